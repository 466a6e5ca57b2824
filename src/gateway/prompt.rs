use crate::database::{AgentProfile, Role};

use super::{ChatTurn, ReplyRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Arabic,
    English,
}

/// Arabic when more than 30% of alphabetic characters are in the Arabic block.
pub fn detect_language(text: &str) -> Language {
    let mut alphabetic = 0usize;
    let mut arabic = 0usize;
    for c in text.chars().filter(|c| c.is_alphabetic()) {
        alphabetic += 1;
        if ('\u{0600}'..='\u{06FF}').contains(&c) {
            arabic += 1;
        }
    }
    if alphabetic > 0 && arabic * 10 > alphabetic * 3 {
        Language::Arabic
    } else {
        Language::English
    }
}

fn default_system_prompt(agent_type: &str, language: Language) -> Option<&'static str> {
    let (ar, en) = match agent_type {
        "finance" => (
            "أنت مساعد ذكي متخصص في الشؤون المالية. تساعد في تحليل البيانات المالية وإعداد التقارير والميزانيات.",
            "You are an AI assistant specialized in finance. You help with financial analysis, reporting, and budgeting.",
        ),
        "procurement" => (
            "أنت مساعد ذكي متخصص في المشتريات والتوريد. تساعد في مقارنة العروض وإدارة الموردين.",
            "You are an AI assistant specialized in procurement. You help with vendor comparison and supplier management.",
        ),
        "hr" => (
            "أنت مساعد ذكي متخصص في الموارد البشرية. تساعد في إدارة الموظفين وتقييم الأداء.",
            "You are an AI assistant specialized in human resources. You help with employee management and performance evaluation.",
        ),
        "supply_chain" => (
            "أنت مساعد ذكي متخصص في سلسلة التوريد. تساعد في تتبع الشحنات وإدارة المخزون.",
            "You are an AI assistant specialized in supply chain. You help with shipment tracking and inventory management.",
        ),
        "customer_service" => (
            "أنت مساعد ذكي متخصص في خدمة العملاء. تساعد في حل مشاكل العملاء وتقديم الدعم.",
            "You are an AI assistant specialized in customer service. You help resolve customer issues and provide support.",
        ),
        _ => return None,
    };
    Some(match language {
        Language::Arabic => ar,
        Language::English => en,
    })
}

/// The agent's own prompt for `language`, else the default for its type.
pub fn system_prompt(agent: &AgentProfile, language: Language) -> Option<String> {
    let custom = match language {
        Language::Arabic => agent.system_prompt_ar.as_deref(),
        Language::English => agent.system_prompt_en.as_deref(),
    };
    custom
        .filter(|p| !p.trim().is_empty())
        .map(str::to_string)
        .or_else(|| default_system_prompt(&agent.agent_type, language).map(str::to_string))
}

/// Provider-neutral prompt: optional system text plus alternating turns
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPrompt {
    pub language: Language,
    pub system: Option<String>,
    pub turns: Vec<ChatTurn>,
}

pub fn prepare(request: &ReplyRequest) -> PreparedPrompt {
    let language = detect_language(&request.message);
    let mut turns: Vec<ChatTurn> = request
        .history
        .iter()
        .filter(|turn| turn.role != Role::System && !turn.content.trim().is_empty())
        .cloned()
        .collect();
    turns.push(ChatTurn::new(Role::User, request.message.clone()));
    PreparedPrompt {
        language,
        system: system_prompt(&request.agent, language),
        turns,
    }
}
