//! The nine rule-based overrides applied after LLM analysis.
//!
//! Each rule is an independent, unconditional transform — later rules may
//! overwrite fields an earlier rule already set, rather than an early-return
//! chain. The functions below run in a fixed order (handoff → explicit
//! transfer → sales stickiness → styling-only → sales-without-order → mixed
//! → order intent → styling stickiness → safety net); every keyword-gated
//! rule that the order rule (7) must dominate is itself guarded against order
//! keywords, so order intent always wins when present regardless of
//! execution position relative to the stickiness rules.

use crate::message::Message;
use crate::session::SmartSession;
use crate::task::{AgentRole, CollaborationAnalysis, CollaborationMode, RecommendedAgent, TaskPriority};

const SALES_KEYWORDS: &[&str] = &[
    "购买", "买", "下单", "推荐", "价格", "优惠", "折扣", "产品", "商品", "衣服", "服装", "上衣", "裤子", "裙子", "外套",
    "衬衫", "t恤",
];
const STYLING_KEYWORDS: &[&str] = &[
    "搭配", "穿搭", "尺码", "风格", "颜色", "休闲", "通勤", "正式", "约会", "运动", "街头", "简约", "复古", "法式",
    "韩系", "日系", "商务", "职场", "上班", "聚会", "旅行",
];
const ORDER_KEYWORDS: &[&str] = &[
    "订单", "查询订单", "订单查询", "订单号", "物流", "快递", "发货", "收货", "配送", "退货", "退款", "售后", "退换货",
    "跟踪", "物流查询", "快递查询",
];
const SALES_STRONG_KEYWORDS: &[&str] = &["购买", "买", "下单", "推荐", "价格", "优惠", "折扣", "促销", "活动", "报价"];
const AFFIRMATIVE_KEYWORDS: &[&str] = &["可以", "好的", "好", "行", "没问题", "是的", "嗯", "ok", "好啊", "没事", "确认"];
const TRANSFER_TO_SALES: &[&str] = &["转销售", "转接销售", "销售智能体", "销售顾问", "找销售", "请销售帮忙"];
const TRANSFER_TO_ORDER: &[&str] = &["转订单", "转接订单", "订单智能体", "订单顾问", "找订单", "请订单帮忙", "转到订单智能体"];
const TRANSFER_TO_KNOWLEDGE: &[&str] = &["转知识", "转接知识", "知识智能体", "知识顾问", "找知识", "请知识帮忙", "转到知识智能体"];
const TRANSFER_TO_STYLING: &[&str] = &["转穿搭", "转接穿搭", "穿搭智能体", "穿搭顾问", "找穿搭", "请穿搭帮忙", "转到穿搭智能体"];

fn contains_any(content: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| content.contains(k))
}

/// Build a `{agent_id, role: support, priority, parallel: true}` entry.
fn parallel_support(agent_id: impl Into<String>, priority: u8) -> RecommendedAgent {
    RecommendedAgent::support(agent_id, priority, true)
}

/// Carry forward any recommendation not already present in `keep`, as
/// parallel support with priority floor `min_priority`.
fn carry_over_remaining(
    keep: &mut Vec<RecommendedAgent>,
    previous: &[RecommendedAgent],
    exclude: &[&str],
    min_priority: u8,
) {
    for agent in previous {
        if agent.agent_id == "reception_agent" {
            continue;
        }
        if exclude.contains(&agent.agent_id.as_str()) {
            continue;
        }
        if keep.iter().any(|a| a.agent_id == agent.agent_id) {
            continue;
        }
        keep.push(RecommendedAgent::support(
            agent.agent_id.clone(),
            agent.priority.max(min_priority),
            true,
        ));
    }
}

/// Run the full override pipeline against one turn.
///
/// Takes `session` mutably only to clear `handoff_pending` when rule 1 fires.
pub fn apply_override_rules(
    message: &Message,
    mut analysis: CollaborationAnalysis,
    session: &mut SmartSession,
) -> CollaborationAnalysis {
    let content = message.content.to_lowercase();

    analysis = rule_handoff_confirmation(&content, analysis, session);
    analysis = rule_explicit_transfer(&content, analysis);
    analysis = rule_sales_stickiness(&content, analysis, session);
    analysis = rule_styling_only_intent(&content, analysis);
    analysis = rule_sales_without_order(&content, analysis);
    analysis = rule_mixed_styling_sales(&content, analysis, session);
    analysis = rule_strong_order_intent(&content, analysis);
    analysis = rule_styling_stickiness(&content, analysis, session);
    analysis = rule_sequential_safety_net(analysis);

    analysis
}

/// Rule 1 — handoff confirmation: if a transfer is pending and the user
/// affirms (or names the pending target explicitly), force it as primary.
fn rule_handoff_confirmation(
    content: &str,
    mut analysis: CollaborationAnalysis,
    session: &mut SmartSession,
) -> CollaborationAnalysis {
    if !session.handoff_pending() {
        return analysis;
    }
    let Some(target) = session.handoff_target() else {
        return analysis;
    };
    if target.is_empty() {
        return analysis;
    }

    let mut confirmed = contains_any(content, AFFIRMATIVE_KEYWORDS);
    confirmed = confirmed
        || match target.as_str() {
            "sales_agent" => contains_any(content, TRANSFER_TO_SALES),
            "order_agent" => contains_any(content, TRANSFER_TO_ORDER),
            "knowledge_agent" => contains_any(content, TRANSFER_TO_KNOWLEDGE),
            "styling_agent" => contains_any(content, TRANSFER_TO_STYLING),
            _ => false,
        };

    if confirmed {
        let mut new_recommended = vec![RecommendedAgent {
            agent_id: target.clone(),
            role: AgentRole::Primary,
            priority: 1,
            parallel: false,
        }];
        carry_over_remaining(&mut new_recommended, &analysis.recommended_agents, &[target.as_str()], 2);

        analysis.recommended_agents = new_recommended;
        analysis.collaboration_mode = CollaborationMode::Consultation;
        analysis.task_priority = TaskPriority::High;
        analysis.fallback_agent = target;
        session.context.insert("handoff_pending".to_string(), serde_json::json!(false));
    }

    analysis
}

/// Rule 2 — explicit transfer phrases force the named agent as sole primary.
fn rule_explicit_transfer(content: &str, mut analysis: CollaborationAnalysis) -> CollaborationAnalysis {
    let target = if contains_any(content, TRANSFER_TO_ORDER) {
        Some("order_agent")
    } else if contains_any(content, TRANSFER_TO_KNOWLEDGE) {
        Some("knowledge_agent")
    } else if contains_any(content, TRANSFER_TO_STYLING) {
        Some("styling_agent")
    } else {
        None
    };

    if let Some(target) = target {
        analysis.recommended_agents = vec![RecommendedAgent::primary(target)];
        analysis.collaboration_mode = CollaborationMode::Consultation;
        analysis.task_priority = TaskPriority::High;
        analysis.fallback_agent = target.to_string();
    }

    analysis
}

/// Rule 4 — session stickiness (sales): keep sales primary unless the
/// utterance explicitly transfers to styling or carries strong order intent.
fn rule_sales_stickiness(
    content: &str,
    mut analysis: CollaborationAnalysis,
    session: &SmartSession,
) -> CollaborationAnalysis {
    let sticky = session.current_agents.iter().any(|a| a == "sales_agent");
    if !sticky || contains_any(content, TRANSFER_TO_STYLING) || contains_any(content, ORDER_KEYWORDS) {
        return analysis;
    }

    let previous = analysis.recommended_agents.clone();
    let mut new_recommended = vec![RecommendedAgent::primary("sales_agent")];

    if contains_any(content, STYLING_KEYWORDS) && !previous.iter().any(|a| a.agent_id == "styling_agent") {
        new_recommended.push(parallel_support("styling_agent", 3));
    }

    if let Some(existing) = previous.iter().find(|a| a.agent_id == "knowledge_agent") {
        new_recommended.push(parallel_support("knowledge_agent", existing.priority.max(2)));
    } else {
        new_recommended.push(parallel_support("knowledge_agent", 2));
    }

    carry_over_remaining(&mut new_recommended, &previous, &["sales_agent", "styling_agent", "knowledge_agent"], 3);

    analysis.recommended_agents = new_recommended;
    analysis.collaboration_mode = CollaborationMode::Consultation;
    analysis.task_priority = TaskPriority::High;
    analysis.fallback_agent = "sales_agent".to_string();
    analysis
}

/// Rule 5 — styling-only intent: styling primary, sales as sequential
/// follow-on support.
fn rule_styling_only_intent(content: &str, mut analysis: CollaborationAnalysis) -> CollaborationAnalysis {
    if !contains_any(content, STYLING_KEYWORDS) || contains_any(content, SALES_KEYWORDS) || contains_any(content, ORDER_KEYWORDS) {
        return analysis;
    }

    let previous = analysis.recommended_agents.clone();
    let mut new_recommended = vec![
        RecommendedAgent::primary("styling_agent"),
        RecommendedAgent::support("sales_agent", 2, false),
    ];

    if let Some(existing) = previous.iter().find(|a| a.agent_id == "knowledge_agent") {
        new_recommended.push(parallel_support("knowledge_agent", existing.priority.max(3)));
    } else {
        new_recommended.push(parallel_support("knowledge_agent", 3));
    }

    analysis.recommended_agents = new_recommended;
    analysis.collaboration_mode = CollaborationMode::Sequential;
    analysis.task_priority = TaskPriority::High;
    analysis.fallback_agent = "sales_agent".to_string();
    analysis
}

/// Rule 6 — sales intent without order keywords: sales primary, knowledge
/// parallel support, styling parallel support if present.
fn rule_sales_without_order(content: &str, mut analysis: CollaborationAnalysis) -> CollaborationAnalysis {
    if !contains_any(content, SALES_KEYWORDS) || contains_any(content, ORDER_KEYWORDS) {
        return analysis;
    }

    let previous = analysis.recommended_agents.clone();
    let mut new_recommended = vec![RecommendedAgent::primary("sales_agent")];

    if let Some(existing) = previous.iter().find(|a| a.agent_id == "knowledge_agent") {
        new_recommended.push(parallel_support("knowledge_agent", existing.priority.max(2)));
    } else {
        new_recommended.push(parallel_support("knowledge_agent", 2));
    }

    if contains_any(content, STYLING_KEYWORDS) {
        new_recommended.push(parallel_support("styling_agent", 3));
    }

    for agent in &previous {
        if agent.agent_id != "sales_agent"
            && agent.agent_id != "reception_agent"
            && !new_recommended.iter().any(|a| a.agent_id == agent.agent_id)
        {
            new_recommended.push(agent.clone());
        }
    }

    analysis.recommended_agents = new_recommended;
    analysis.collaboration_mode = CollaborationMode::Consultation;
    analysis.task_priority = TaskPriority::High;
    analysis.fallback_agent = "sales_agent".to_string();
    analysis
}

/// Rule 7 — mixed styling + sales keywords, no order: pick primary by
/// session stickiness or strong sales keywords.
fn rule_mixed_styling_sales(
    content: &str,
    mut analysis: CollaborationAnalysis,
    session: &SmartSession,
) -> CollaborationAnalysis {
    if !contains_any(content, STYLING_KEYWORDS) || !contains_any(content, SALES_KEYWORDS) || contains_any(content, ORDER_KEYWORDS) {
        return analysis;
    }

    let prefer_sales = session.current_agents.iter().any(|a| a == "sales_agent") || contains_any(content, SALES_STRONG_KEYWORDS);

    if prefer_sales {
        analysis.recommended_agents = vec![
            RecommendedAgent::primary("sales_agent"),
            RecommendedAgent::support("styling_agent", 2, false),
            parallel_support("knowledge_agent", 3),
        ];
        analysis.collaboration_mode = CollaborationMode::Consultation;
    } else {
        analysis.recommended_agents = vec![
            RecommendedAgent::primary("styling_agent"),
            RecommendedAgent::support("sales_agent", 2, false),
            parallel_support("knowledge_agent", 3),
        ];
        analysis.collaboration_mode = CollaborationMode::Sequential;
    }
    analysis.task_priority = TaskPriority::High;
    analysis.fallback_agent = "sales_agent".to_string();
    analysis
}

/// Rule 3 — strong order intent dominates regardless of what earlier rules set.
fn rule_strong_order_intent(content: &str, mut analysis: CollaborationAnalysis) -> CollaborationAnalysis {
    if !contains_any(content, ORDER_KEYWORDS) {
        return analysis;
    }

    let previous = analysis.recommended_agents.clone();
    let mut new_recommended = vec![RecommendedAgent::primary("order_agent")];
    carry_over_remaining(&mut new_recommended, &previous, &["order_agent"], 2);

    analysis.recommended_agents = new_recommended;
    analysis.collaboration_mode = CollaborationMode::Consultation;
    analysis.task_priority = TaskPriority::High;
    analysis.fallback_agent = "order_agent".to_string();
    analysis
}

/// Rule 8 — session stickiness (styling): mirror of rule 4 for styling.
fn rule_styling_stickiness(
    content: &str,
    mut analysis: CollaborationAnalysis,
    session: &SmartSession,
) -> CollaborationAnalysis {
    let sticky = session.current_agents.iter().any(|a| a == "styling_agent");
    if !sticky || contains_any(content, SALES_KEYWORDS) || contains_any(content, ORDER_KEYWORDS) {
        return analysis;
    }

    let previous = analysis.recommended_agents.clone();
    let mut new_recommended = vec![RecommendedAgent::primary("styling_agent")];

    if !previous.iter().any(|a| a.agent_id == "sales_agent") {
        new_recommended.push(RecommendedAgent::support("sales_agent", 2, false));
    }

    for agent in &previous {
        if agent.agent_id != "styling_agent" && agent.agent_id != "sales_agent" && agent.agent_id != "reception_agent" {
            new_recommended.push(parallel_support(agent.agent_id.clone(), agent.priority.max(3)));
        }
    }

    analysis.recommended_agents = new_recommended;
    analysis.collaboration_mode = CollaborationMode::Sequential;
    analysis.task_priority = TaskPriority::High;
    analysis.fallback_agent = "sales_agent".to_string();
    analysis
}

/// Rule 9 — sequential safety net: if the primary ended up as
/// `styling_agent` with no sales support, append sales and force sequential.
fn rule_sequential_safety_net(mut analysis: CollaborationAnalysis) -> CollaborationAnalysis {
    let is_styling_primary = analysis.primary_agent_id() == Some("styling_agent");
    if !is_styling_primary {
        return analysis;
    }

    let has_sales = analysis.recommended_agents.iter().any(|a| a.agent_id == "sales_agent");
    if !has_sales {
        analysis.recommended_agents.push(RecommendedAgent::support("sales_agent", 2, false));
    }
    analysis.collaboration_mode = CollaborationMode::Sequential;
    analysis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SmartSession;

    fn msg(content: &str) -> Message {
        Message::new(content, "u1", "c1")
    }

    fn default_session() -> SmartSession {
        SmartSession::new("u1".to_string(), "c1".to_string())
    }

    #[test]
    fn order_intent_overrides_sales_stickiness() {
        let mut session = default_session();
        session.current_agents = vec!["sales_agent".to_string()];
        let analysis = CollaborationAnalysis::default_single_reception();
        let result = apply_override_rules(&msg("我的订单 20231215XXXX 还没发货"), analysis, &mut session);
        assert_eq!(result.primary_agent_id(), Some("order_agent"));
    }

    #[test]
    fn styling_only_routes_to_styling_with_sequential_sales_support() {
        let mut session = default_session();
        let analysis = CollaborationAnalysis::default_single_reception();
        let result = apply_override_rules(&msg("约会穿什么比较好？"), analysis, &mut session);
        assert_eq!(result.primary_agent_id(), Some("styling_agent"));
        assert_eq!(result.collaboration_mode, CollaborationMode::Sequential);
        assert!(result.recommended_agents.iter().any(|a| a.agent_id == "sales_agent" && !a.parallel));
    }

    #[test]
    fn order_and_styling_keywords_together_favor_order() {
        let mut session = default_session();
        let analysis = CollaborationAnalysis::default_single_reception();
        let result = apply_override_rules(&msg("订单搭配风格都想问问"), analysis, &mut session);
        assert_eq!(result.primary_agent_id(), Some("order_agent"));
    }

    #[test]
    fn handoff_confirmation_routes_to_pending_target() {
        let mut session = default_session();
        session
            .context
            .insert("handoff_pending".to_string(), serde_json::json!(true));
        session
            .context
            .insert("handoff_target".to_string(), serde_json::json!("sales_agent"));
        let analysis = CollaborationAnalysis::default_single_reception();
        let result = apply_override_rules(&msg("好的"), analysis, &mut session);
        assert_eq!(result.primary_agent_id(), Some("sales_agent"));
        assert!(!session.handoff_pending());
    }

    #[test]
    fn sales_stickiness_keeps_sales_primary() {
        let mut session = default_session();
        session.current_agents = vec!["sales_agent".to_string()];
        let analysis = CollaborationAnalysis::default_single_reception();
        let result = apply_override_rules(&msg("还有别的颜色吗"), analysis, &mut session);
        assert_eq!(result.primary_agent_id(), Some("sales_agent"));
    }

    #[test]
    fn safety_net_appends_sales_when_styling_primary_has_no_support() {
        let mut analysis = CollaborationAnalysis::default_single_reception();
        analysis.recommended_agents = vec![RecommendedAgent::primary("styling_agent")];
        let result = rule_sequential_safety_net(analysis);
        assert!(result.recommended_agents.iter().any(|a| a.agent_id == "sales_agent"));
        assert_eq!(result.collaboration_mode, CollaborationMode::Sequential);
    }
}
