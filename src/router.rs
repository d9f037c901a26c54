//! Query routing.
//!
//! A [`RuleChain`] is an ordered list of [`Rule`]s; the first rule that
//! answers a query wins. [`QueryRouter::standard`] assembles the built-in
//! chain:
//!
//! | Order | Rule | Matches |
//! |-------|------|---------|
//! | 1 | `greeting` | exactly "hi", "hello", "hey" |
//! | 2 | `identity` | "who are you", "what are you", "your name" |
//! | 3 | `capability` | "what can you do", "services", ... |
//! | 4 | `thanks` | starts with "thank", "thanks", "appreciate" |
//! | 5 | `web_search` | "search the web for ..." (only when enabled) |
//! | 6 | `arithmetic` | expressions that evaluate exactly |
//! | 7 | `repeated_question` | a query already answered, verbatim |
//! | 8 | `generator` | everything else, via the language model |
//!
//! Rules never persist anything; the chat service records the turn once
//! the router has answered.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::arithmetic;
use crate::config::SearchConfig;
use crate::history::HistoryStore;
use crate::intent;
use crate::memory::ConversationMemory;
use crate::responder::{ResponseGenerator, GENERATION_FAILED};
use crate::websearch::{self, SearchProvider};

const WEB_SEARCH_PREFIXES: [&str; 2] = ["search the web for", "web search"];

/// A query as seen by the rules.
pub struct RouteContext<'a> {
    /// Text as typed; used for storage lookups and prompts.
    pub raw: &'a str,
    /// Trimmed and lowercased; used for phrase matching.
    pub normalized: String,
    pub memory: &'a ConversationMemory,
}

impl<'a> RouteContext<'a> {
    pub fn new(raw: &'a str, memory: &'a ConversationMemory) -> Self {
        Self {
            raw,
            normalized: intent::normalize(raw),
            memory,
        }
    }
}

#[async_trait]
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the reply if this rule handles the query.
    async fn respond(&self, ctx: &RouteContext<'_>) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteOutcome {
    /// Name of the rule that answered.
    pub rule: &'static str,
    pub response: String,
}

#[derive(Default)]
pub struct RuleChain {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleChain {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Appends a rule after the ones already registered.
    pub fn register(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub async fn dispatch(&self, ctx: &RouteContext<'_>) -> Option<RouteOutcome> {
        for rule in &self.rules {
            if let Some(response) = rule.respond(ctx).await {
                tracing::debug!(rule = rule.name(), "query routed");
                return Some(RouteOutcome {
                    rule: rule.name(),
                    response,
                });
            }
        }
        None
    }
}

pub struct QueryRouter {
    chain: RuleChain,
}

impl QueryRouter {
    pub fn new(chain: RuleChain) -> Self {
        Self { chain }
    }

    /// The built-in chain. The web search rule is included only when a
    /// provider is given and `search.enabled` is set.
    pub fn standard(
        history: HistoryStore,
        generator: Arc<ResponseGenerator>,
        search: Option<(Arc<dyn SearchProvider>, &SearchConfig)>,
    ) -> Self {
        let mut chain = RuleChain::new();
        chain.register(Box::new(GreetingRule::new(history.clone())));
        chain.register(Box::new(IdentityRule));
        chain.register(Box::new(CapabilityRule));
        chain.register(Box::new(ThanksRule));
        if let Some((provider, config)) = search {
            if config.enabled {
                chain.register(Box::new(WebSearchRule::new(provider, config)));
            }
        }
        chain.register(Box::new(ArithmeticRule));
        chain.register(Box::new(RepeatedQuestionRule::new(history)));
        chain.register(Box::new(GeneratorRule::new(generator)));
        Self::new(chain)
    }

    pub fn rules(&self) -> Vec<&'static str> {
        self.chain.names()
    }

    pub async fn route(&self, query: &str, memory: &ConversationMemory) -> RouteOutcome {
        let ctx = RouteContext::new(query, memory);
        match self.chain.dispatch(&ctx).await {
            Some(outcome) => outcome,
            None => RouteOutcome {
                rule: "none",
                response: GENERATION_FAILED.to_string(),
            },
        }
    }
}

// ============ Rules ============

/// Greets, or welcomes back when the previous stored turn was a greeting too.
pub struct GreetingRule {
    history: HistoryStore,
}

impl GreetingRule {
    pub fn new(history: HistoryStore) -> Self {
        Self { history }
    }

    async fn previous_was_greeting(&self) -> bool {
        match self.history.most_recent_turn().await {
            Ok(Some(turn)) => intent::is_greeting(&intent::normalize(&turn.user_query)),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "history lookup failed");
                false
            }
        }
    }
}

#[async_trait]
impl Rule for GreetingRule {
    fn name(&self) -> &'static str {
        "greeting"
    }

    async fn respond(&self, ctx: &RouteContext<'_>) -> Option<String> {
        if !intent::is_greeting(&ctx.normalized) {
            return None;
        }
        let pool: &[&'static str] = if self.previous_was_greeting().await {
            &intent::REPEAT_GREETINGS
        } else {
            &intent::FIRST_GREETINGS
        };
        Some(intent::pick(pool).to_string())
    }
}

pub struct IdentityRule;

#[async_trait]
impl Rule for IdentityRule {
    fn name(&self) -> &'static str {
        "identity"
    }

    async fn respond(&self, ctx: &RouteContext<'_>) -> Option<String> {
        intent::is_identity_question(&ctx.normalized).then(intent::describe_identity)
    }
}

pub struct CapabilityRule;

#[async_trait]
impl Rule for CapabilityRule {
    fn name(&self) -> &'static str {
        "capability"
    }

    async fn respond(&self, ctx: &RouteContext<'_>) -> Option<String> {
        intent::is_capability_question(&ctx.normalized)
            .then(|| intent::list_services(intent::wants_detail(&ctx.normalized)))
    }
}

pub struct ThanksRule;

#[async_trait]
impl Rule for ThanksRule {
    fn name(&self) -> &'static str {
        "thanks"
    }

    async fn respond(&self, ctx: &RouteContext<'_>) -> Option<String> {
        intent::is_thanks(&ctx.normalized).then(|| intent::pick(&intent::THANKS_REPLIES).to_string())
    }
}

/// "search the web for <terms>" and "web search <terms>".
pub struct WebSearchRule {
    provider: Arc<dyn SearchProvider>,
    max_results: usize,
    timeout: Duration,
}

impl WebSearchRule {
    pub fn new(provider: Arc<dyn SearchProvider>, config: &SearchConfig) -> Self {
        Self {
            provider,
            max_results: config.max_results,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Search terms following a web-search prefix, with the caller's casing.
pub fn web_search_terms(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    WEB_SEARCH_PREFIXES.iter().find_map(|prefix| {
        let head = trimmed.get(..prefix.len())?;
        if !head.eq_ignore_ascii_case(prefix) {
            return None;
        }
        let rest = &trimmed[prefix.len()..];
        if !rest.starts_with([' ', '\t', ':']) {
            return None;
        }
        let terms = rest.trim_start_matches(':').trim();
        (!terms.is_empty()).then_some(terms)
    })
}

#[async_trait]
impl Rule for WebSearchRule {
    fn name(&self) -> &'static str {
        "web_search"
    }

    async fn respond(&self, ctx: &RouteContext<'_>) -> Option<String> {
        let terms = web_search_terms(ctx.raw)?;
        Some(websearch::search(self.provider.as_ref(), terms, self.max_results, self.timeout).await)
    }
}

pub struct ArithmeticRule;

#[async_trait]
impl Rule for ArithmeticRule {
    fn name(&self) -> &'static str {
        "arithmetic"
    }

    async fn respond(&self, ctx: &RouteContext<'_>) -> Option<String> {
        arithmetic::try_evaluate(ctx.raw).map(|value| format!("The result is: {}", value))
    }
}

/// Replays the stored answer for a query asked before, matched verbatim.
pub struct RepeatedQuestionRule {
    history: HistoryStore,
}

impl RepeatedQuestionRule {
    pub fn new(history: HistoryStore) -> Self {
        Self { history }
    }
}

#[async_trait]
impl Rule for RepeatedQuestionRule {
    fn name(&self) -> &'static str {
        "repeated_question"
    }

    async fn respond(&self, ctx: &RouteContext<'_>) -> Option<String> {
        match self.history.find_latest_answer(ctx.raw).await {
            Ok(Some(answer)) => Some(format!(
                "I remember answering this before:\n\n{}\n\nLet me know if you need more details!",
                answer
            )),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "history lookup failed");
                None
            }
        }
    }
}

/// Fallback: always answers, via the language model.
pub struct GeneratorRule {
    generator: Arc<ResponseGenerator>,
}

impl GeneratorRule {
    pub fn new(generator: Arc<ResponseGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Rule for GeneratorRule {
    fn name(&self) -> &'static str {
        "generator"
    }

    async fn respond(&self, ctx: &RouteContext<'_>) -> Option<String> {
        Some(self.generator.answer(ctx.raw, ctx.memory).await)
    }
}
