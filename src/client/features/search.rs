//! Search features: query transformers and issue results providers
//!
//! Both are document-independent. Query transformers are *chained*: each
//! registered transformer rewrites the output of the previous one, in
//! registration order, and the chain is recomputed whenever the transformer
//! set changes. Issue results follow the usual barrier aggregation with list
//! concatenation.

use std::sync::Arc;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::client::aggregator::{InvocationStream, aggregate};
use crate::client::registry::{ProviderError, ProviderRegistry, RegistrationHandle};
use crate::client::selector::DocumentSelector;
use crate::metrics;
use crate::types::IssueResult;

/// One query rewrite step.
pub type TransformQuerySignature =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<String, ProviderError>> + Send + Sync>;

/// Registry of query transformers.
#[derive(Default)]
pub struct QueryTransformerRegistry {
    registry: ProviderRegistry<(), TransformQuerySignature>,
}

impl QueryTransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_provider(&self, provider: TransformQuerySignature) -> RegistrationHandle {
        // Transformers apply to every query; the selector slot is fixed to
        // match-all.
        self.registry.register(DocumentSelector::all(), (), provider)
    }

    /// The query folded through every registered transformer, re-emitted
    /// whenever the transformer set changes. A failing transformer is logged
    /// and skipped; the chain continues with the untransformed input.
    pub fn transformed_query(&self, query: String) -> BoxStream<'static, String> {
        metrics::metrics().record_query("transformQuery");
        self.registry
            .all_providers()
            .then(move |entries| {
                let query = query.clone();
                async move {
                    let mut transformed = query;
                    for entry in entries {
                        match (entry.provider)(transformed.clone()).await {
                            Ok(next) => transformed = next,
                            Err(error) => {
                                tracing::warn!(
                                    provider = entry.id,
                                    %error,
                                    "query transformer failed; skipping"
                                );
                                metrics::metrics().record_provider_failure();
                            }
                        }
                    }
                    transformed
                }
            })
            .boxed()
    }

    /// Convenience: the current transformation of `query`.
    pub async fn transform_query(&self, query: String) -> String {
        let fallback = query.clone();
        self.transformed_query(query).next().await.unwrap_or(fallback)
    }
}

/// Per-query issue results invocation.
pub type ProvideIssueResultsSignature =
    Arc<dyn Fn(String) -> InvocationStream<Vec<IssueResult>> + Send + Sync>;

/// Registry plus aggregation for issue results providers.
#[derive(Default)]
pub struct IssueResultsService {
    registry: ProviderRegistry<(), ProvideIssueResultsSignature>,
}

impl IssueResultsService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_provider(&self, provider: ProvideIssueResultsSignature) -> RegistrationHandle {
        self.registry.register(DocumentSelector::all(), (), provider)
    }

    /// Continuously-updated concatenation of every provider's results for
    /// `query`, in registration order.
    pub fn get_results(&self, query: String) -> BoxStream<'static, Vec<IssueResult>> {
        metrics::metrics().record_query("issueResults");
        aggregate(
            self.registry.all_providers(),
            move |entry| (entry.provider)(query.clone()),
            |values: Vec<Option<Vec<IssueResult>>>| {
                values.into_iter().flatten().flatten().collect::<Vec<_>>()
            },
        )
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suffixer(suffix: &'static str) -> TransformQuerySignature {
        Arc::new(move |query| Box::pin(async move { Ok(format!("{query} {suffix}")) }))
    }

    fn issue(title: &'static str) -> IssueResult {
        IssueResult {
            title: title.to_owned(),
            url: format!("https://issues.example.com/{title}"),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_transformers_chain_in_registration_order() {
        let registry = QueryTransformerRegistry::new();
        registry.register_provider(suffixer("lang:rust"));
        registry.register_provider(suffixer("count:100"));

        let transformed = registry.transform_query("foo".into()).await;
        assert_eq!(transformed, "foo lang:rust count:100");
    }

    #[tokio::test]
    async fn test_no_transformers_passes_query_through() {
        let registry = QueryTransformerRegistry::new();
        assert_eq!(registry.transform_query("foo".into()).await, "foo");
    }

    #[tokio::test]
    async fn test_failing_transformer_is_skipped() {
        let registry = QueryTransformerRegistry::new();
        registry.register_provider(Arc::new(|_| {
            Box::pin(async { Err(ProviderError::Invocation("boom".into())) })
        }));
        registry.register_provider(suffixer("ok"));

        assert_eq!(registry.transform_query("foo".into()).await, "foo ok");
    }

    #[tokio::test]
    async fn test_transformed_query_reacts_to_registrations() {
        let registry = QueryTransformerRegistry::new();
        let mut stream = registry.transformed_query("foo".into());
        assert_eq!(stream.next().await.unwrap(), "foo");

        registry.register_provider(suffixer("x"));
        assert_eq!(stream.next().await.unwrap(), "foo x");
    }

    #[tokio::test]
    async fn test_issue_results_concatenate() {
        let service = IssueResultsService::new();
        for title in ["a", "b"] {
            service.register_provider(Arc::new(move |_query| {
                futures::stream::once(async move { Ok(Some(vec![issue(title)])) }).boxed()
            }));
        }

        let results = service.get_results("q".into()).next().await.unwrap();
        let titles: Vec<_> = results.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_issue_results_null_answer_is_empty() {
        let service = IssueResultsService::new();
        service.register_provider(Arc::new(|_query| {
            futures::stream::once(async { Ok(None) }).boxed()
        }));

        let results = service.get_results("q".into()).next().await.unwrap();
        assert!(results.is_empty());
    }
}
