use std::sync::Arc;
use std::time::Instant;

use concourse_core::{ConversationState, Message};
use concourse_nlu::IntentClassifier;
use concourse_observability::AppMetrics;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::complex::ComplexIntentHandler;
use crate::registry::{HandlerRegistry, TurnHandler};
use crate::router::{route_after_classification, route_after_verification, Node};
use crate::verify::IntentVerifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: Node,
    pub to: Node,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub state: ConversationState,
    pub path: Vec<Node>,
}

impl TurnOutcome {
    pub fn response(&self) -> &str {
        self.state.response().unwrap_or_default()
    }

    /// Terminal node that produced the response.
    pub fn answered_by(&self) -> Option<Node> {
        self.path
            .last()
            .copied()
            .filter(|node| node.is_terminal_handler())
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Entry,
    RoutingAfterClassification,
    Verifying,
    RoutingAfterVerification,
    Handling(Node),
    Done,
}

/// Runs one turn: classify, optionally verify once, then exactly one terminal
/// handler. Nodes run strictly one after another.
#[derive(Clone)]
pub struct TurnGraph {
    classifier: Arc<dyn IntentClassifier>,
    verifier: Arc<dyn IntentVerifier>,
    registry: Arc<HandlerRegistry>,
    complex: ComplexIntentHandler,
    metrics: Arc<AppMetrics>,
}

impl TurnGraph {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        verifier: Arc<dyn IntentVerifier>,
        registry: Arc<HandlerRegistry>,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            classifier,
            verifier,
            complex: ComplexIntentHandler::new(registry.clone()),
            registry,
            metrics,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<AppMetrics> {
        &self.metrics
    }

    pub async fn run_turn(
        &self,
        user_input: impl Into<String>,
        messages: impl Into<Arc<[Message]>>,
    ) -> TurnOutcome {
        self.run(ConversationState::new(user_input, messages)).await
    }

    #[instrument(skip(self, state), fields(history = state.messages().len()))]
    pub async fn run(&self, state: ConversationState) -> TurnOutcome {
        let started = Instant::now();
        self.metrics.inc_turn();

        let mut state = state;
        let mut path = Vec::with_capacity(3);
        let mut phase = Phase::Entry;

        loop {
            phase = match phase {
                Phase::Entry => {
                    path.push(Node::ClassifyIntent);
                    state = self.classify(state).await;
                    Phase::RoutingAfterClassification
                }
                Phase::RoutingAfterClassification => {
                    match route_after_classification(&state, &self.registry) {
                        Node::VerifyIntent => Phase::Verifying,
                        node => {
                            if matches!(node, Node::Handler(_)) {
                                self.metrics.inc_direct_route();
                            }
                            Phase::Handling(node)
                        }
                    }
                }
                Phase::Verifying => {
                    path.push(Node::VerifyIntent);
                    self.metrics.inc_verification();
                    let verification = self.verifier.verify(&state).await;
                    state = state.with_verification(verification);
                    Phase::RoutingAfterVerification
                }
                Phase::RoutingAfterVerification => {
                    Phase::Handling(route_after_verification(&state, &self.registry))
                }
                Phase::Handling(node) => {
                    let (node, reply) = self.dispatch(node, &state).await;
                    path.push(node);
                    state = state.with_response(reply);
                    Phase::Done
                }
                Phase::Done => break,
            };
        }

        self.metrics.observe_latency(started.elapsed());
        info!(
            intent = state.intent().map(|label| label.as_str()).unwrap_or("none"),
            slots = state.slots().len(),
            path = %path.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> "),
            latency_ms = started.elapsed().as_millis() as u64,
            "turn handled"
        );

        TurnOutcome { state, path }
    }

    async fn classify(&self, state: ConversationState) -> ConversationState {
        let result = self
            .classifier
            .classify(state.user_input(), state.messages())
            .await;

        match result {
            Ok(classification) => state.with_classification(classification),
            Err(error) => {
                warn!(error = %error, "classification failed, continuing without intent");
                self.metrics.inc_classifier_failure();
                state
            }
        }
    }

    /// Runs the terminal node; anything that is not a resolvable handler ends
    /// at the fallback.
    async fn dispatch(&self, node: Node, state: &ConversationState) -> (Node, String) {
        match node {
            Node::ComplexIntent => {
                self.metrics.inc_complex_route();
                (node, self.complex.handle(state).await)
            }
            Node::Handler(intent) => match self.registry.handler(intent) {
                Some(handler) => (node, handler.handle(state).await),
                None => self.fallback(state).await,
            },
            _ => self.fallback(state).await,
        }
    }

    async fn fallback(&self, state: &ConversationState) -> (Node, String) {
        self.metrics.inc_fallback();
        (Node::Fallback, self.registry.fallback().handle(state).await)
    }

    /// Fixed topology, for diagnostics.
    pub fn edges(&self) -> Vec<Edge> {
        let handlers = self
            .registry
            .supported_intents()
            .map(Node::Handler)
            .collect::<Vec<_>>();
        let mut edges = Vec::new();

        for to in handlers
            .iter()
            .copied()
            .chain([Node::ComplexIntent, Node::VerifyIntent])
        {
            edges.push(Edge {
                from: Node::ClassifyIntent,
                to,
            });
        }
        for to in handlers
            .iter()
            .copied()
            .chain([Node::ComplexIntent, Node::Fallback])
        {
            edges.push(Edge {
                from: Node::VerifyIntent,
                to,
            });
        }
        for from in handlers
            .into_iter()
            .chain([Node::ComplexIntent, Node::Fallback])
        {
            edges.push(Edge { from, to: Node::End });
        }

        edges
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use concourse_core::{
        Classification, Intent, IntentLabel, IntentScore, Slot, SlotGroupTable, Verification,
    };

    use super::*;
    use crate::registry::tests::echo;
    use crate::verify::PassthroughVerifier;

    struct FixedClassifier(Classification);

    #[async_trait]
    impl IntentClassifier for FixedClassifier {
        async fn classify(&self, _: &str, _: &[Message]) -> Result<Classification> {
            Ok(self.0.clone())
        }
    }

    struct BrokenClassifier;

    #[async_trait]
    impl IntentClassifier for BrokenClassifier {
        async fn classify(&self, _: &str, _: &[Message]) -> Result<Classification> {
            anyhow::bail!("model not loaded")
        }
    }

    struct FixedVerifier(Verification);

    #[async_trait]
    impl IntentVerifier for FixedVerifier {
        async fn verify(&self, _: &ConversationState) -> Verification {
            self.0.clone()
        }
    }

    fn registry() -> Arc<HandlerRegistry> {
        Arc::new(
            HandlerRegistry::builder()
                .register(Intent::ParkingFeeInfo, echo("fee"))
                .register(Intent::AirlineInfoQuery, echo("airline"))
                .fallback(echo("fallback"))
                .build(SlotGroupTable::default())
                .unwrap(),
        )
    }

    fn graph(classifier: Arc<dyn IntentClassifier>, verifier: Arc<dyn IntentVerifier>) -> TurnGraph {
        TurnGraph::new(classifier, verifier, registry(), AppMetrics::shared())
    }

    fn classified(ranking: Vec<IntentScore>, slots: Vec<Slot>) -> Arc<dyn IntentClassifier> {
        Arc::new(FixedClassifier(Classification::ranked(ranking, slots)))
    }

    #[tokio::test]
    async fn confident_turn_goes_straight_to_its_handler() {
        let graph = graph(
            classified(vec![IntentScore::new(Intent::ParkingFeeInfo, 0.95)], Vec::new()),
            Arc::new(PassthroughVerifier),
        );
        let outcome = graph
            .run_turn("주차 요금", vec![Message::user("안녕")])
            .await;

        assert_eq!(
            outcome.path,
            vec![Node::ClassifyIntent, Node::Handler(Intent::ParkingFeeInfo)]
        );
        assert_eq!(outcome.response(), "fee:주차 요금");
        assert_eq!(graph.metrics().snapshot().direct_routes_total, 1);
    }

    #[tokio::test]
    async fn multi_domain_slots_reach_the_complex_handler() {
        let graph = graph(
            classified(
                vec![IntentScore::new(Intent::ParkingFeeInfo, 0.99)],
                vec![
                    Slot::new("주차장", "B-parking_lot"),
                    Slot::new("항공사", "B-airline_name"),
                ],
            ),
            Arc::new(PassthroughVerifier),
        );
        let outcome = graph.run_turn("주차장 항공사", Vec::new()).await;

        assert_eq!(outcome.answered_by(), Some(Node::ComplexIntent));
        assert!(outcome.response().contains("[주차 요금 안내]"));
        assert!(outcome.response().contains("[항공사 정보]"));
        assert_eq!(
            outcome.state.intent(),
            Some(&IntentLabel::Domain(Intent::ParkingFeeInfo))
        );
    }

    #[tokio::test]
    async fn verification_runs_once_and_can_rephrase() {
        let graph = graph(
            classified(vec![IntentScore::new(Intent::FlightInfo, 0.3)], Vec::new()),
            Arc::new(FixedVerifier(Verification {
                intent: Some(Intent::ParkingFeeInfo.into()),
                rephrased_query: Some("단기주차장 요금".to_string()),
            })),
        );
        let outcome = graph
            .run_turn(
                "거기는?",
                vec![Message::user("단기주차장 위치"), Message::assistant("...")],
            )
            .await;

        assert_eq!(
            outcome.path,
            vec![
                Node::ClassifyIntent,
                Node::VerifyIntent,
                Node::Handler(Intent::ParkingFeeInfo)
            ]
        );
        assert_eq!(outcome.response(), "fee:단기주차장 요금");
        assert_eq!(outcome.state.user_input(), "거기는?");
    }

    #[tokio::test]
    async fn unresolved_intent_after_verification_falls_back() {
        let graph = graph(
            classified(Vec::new(), Vec::new()),
            Arc::new(FixedVerifier(Verification {
                intent: Some(IntentLabel::parse("unknown_xyz")),
                rephrased_query: None,
            })),
        );
        let outcome = graph.run_turn("???", Vec::new()).await;

        assert_eq!(
            outcome.path,
            vec![Node::ClassifyIntent, Node::VerifyIntent, Node::Fallback]
        );
        assert_eq!(outcome.response(), "fallback:???");
        assert_eq!(graph.metrics().snapshot().fallback_total, 1);
    }

    #[tokio::test]
    async fn classifier_failure_degrades_to_fallback() {
        let graph = graph(Arc::new(BrokenClassifier), Arc::new(PassthroughVerifier));
        let outcome = graph.run_turn("hello", Vec::new()).await;

        assert!(outcome.state.slots().is_empty());
        assert_eq!(outcome.state.intent(), None);
        assert_eq!(outcome.answered_by(), Some(Node::Fallback));
        assert_eq!(graph.metrics().snapshot().classifier_failures_total, 1);
    }

    #[tokio::test]
    async fn same_input_same_outcome() {
        let graph = graph(
            classified(vec![IntentScore::new(Intent::AirlineInfoQuery, 0.6)], Vec::new()),
            Arc::new(PassthroughVerifier),
        );
        let first = graph.run_turn("항공사 번호", Vec::new()).await;
        let second = graph.run_turn("항공사 번호", Vec::new()).await;

        assert_eq!(first.path, second.path);
        assert_eq!(first.response(), second.response());
        assert_eq!(first.answered_by(), Some(Node::Handler(Intent::AirlineInfoQuery)));
    }

    #[test]
    fn topology_lists_every_fan_out() {
        let graph = graph(classified(Vec::new(), Vec::new()), Arc::new(PassthroughVerifier));
        let edges = graph.edges();

        let from = |node: Node| {
            edges
                .iter()
                .filter(|edge| edge.from == node)
                .map(|edge| edge.to)
                .collect::<Vec<_>>()
        };

        assert_eq!(
            from(Node::ClassifyIntent),
            vec![
                Node::Handler(Intent::ParkingFeeInfo),
                Node::Handler(Intent::AirlineInfoQuery),
                Node::ComplexIntent,
                Node::VerifyIntent
            ]
        );
        assert!(from(Node::VerifyIntent).contains(&Node::Fallback));
        assert!(!from(Node::VerifyIntent).contains(&Node::VerifyIntent));
        assert_eq!(from(Node::Fallback), vec![Node::End]);
        assert_eq!(from(Node::ComplexIntent), vec![Node::End]);
    }
}
