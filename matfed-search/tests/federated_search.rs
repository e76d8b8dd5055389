//! End-to-end tests of the federated search pipeline.
//!
//! Providers are in-process mock clients, so these tests exercise
//! selection, fan-out, fusion, health, and caching without any network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use matfed_search::{
    CircuitState, FederatedSearch, FetchOutcome, HealthManager, Property, PropertyRange,
    ProviderClient, ProviderEndpoint, ProviderError, ProviderRegistry, ProviderStatus, Query,
    RawProperty, RawRecord, SearchCache, SearchConfig, SearchError, SearchOptions,
};
use matfed_search::provider::ApiType;
use tokio_util::sync::CancellationToken;

enum Reply {
    Records(Vec<RawRecord>),
    Hang,
    Malformed,
    Down,
}

struct MockClient {
    reply: Reply,
    calls: AtomicUsize,
}

impl MockClient {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for MockClient {
    async fn fetch(
        &self,
        endpoint: &ProviderEndpoint,
        _query: &Query,
        _limit: usize,
    ) -> Result<FetchOutcome, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Reply::Records(records) => Ok(FetchOutcome {
                records: records.clone(),
                ..Default::default()
            }),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(FetchOutcome::default())
            }
            Reply::Malformed => Err(ProviderError::Parse(format!(
                "{}: missing field `data`",
                endpoint.id
            ))),
            Reply::Down => Err(ProviderError::Http {
                status: Some(503),
                message: "Service Unavailable".into(),
            }),
        }
    }

    fn api_type(&self) -> ApiType {
        ApiType::Optimade
    }
}

fn registry(parts: &[(&str, &Arc<MockClient>)]) -> ProviderRegistry {
    ProviderRegistry::from_parts(
        parts
            .iter()
            .map(|(id, client)| {
                let endpoint = ProviderEndpoint::new(*id, format!("https://{id}.example"));
                (endpoint, Arc::clone(*client) as Arc<dyn ProviderClient>)
            })
            .collect(),
    )
}

fn fast_config() -> SearchConfig {
    SearchConfig {
        timeout_seconds: 1,
        ..Default::default()
    }
}

fn fe_o() -> Query {
    Query::builder()
        .elements(["Fe", "O"])
        .limit(10)
        .build()
        .unwrap()
}

fn hematite(source: &str, id: &str) -> RawRecord {
    RawRecord::new(source, id)
        .with_formula("Fe2O3")
        .with_elements(["Fe", "O"])
}

#[tokio::test]
async fn records_from_two_providers_fuse_into_one_material() {
    let a = MockClient::new(Reply::Records(vec![
        hematite("a", "a-1").with_property("band_gap", RawProperty::new(2.2).with_unit("eV")),
    ]));
    let b = MockClient::new(Reply::Records(vec![hematite("b", "b-7").with_property(
        "formation_energy",
        RawProperty::new(-1.5).with_unit("eV/atom"),
    )]));
    let search =
        FederatedSearch::in_memory(registry(&[("a", &a), ("b", &b)]), fast_config()).unwrap();

    let result = search.search(&fe_o()).await.unwrap();

    assert_eq!(result.materials.len(), 1);
    assert_eq!(result.total_count, 1);
    let material = &result.materials[0];
    assert_eq!(material.formula, "Fe2O3");
    assert_eq!(material.sources, vec!["a", "b"]);
    assert_eq!(material.property("band_gap").unwrap().value, 2.2);
    assert_eq!(material.property("band_gap").unwrap().source, "a");
    assert_eq!(material.property("formation_energy").unwrap().value, -1.5);
    assert_eq!(material.property("formation_energy").unwrap().source, "b");
    assert_eq!(material.identifiers.len(), 2);

    assert_eq!(result.provider_logs.len(), 2);
    assert!(result
        .provider_logs
        .iter()
        .all(|l| l.status == ProviderStatus::Success && l.result_count == 1));
    assert!(!result.cached);
}

#[tokio::test]
async fn identical_query_is_served_from_cache() {
    let a = MockClient::new(Reply::Records(vec![hematite("a", "a-1")]));
    let search = FederatedSearch::in_memory(registry(&[("a", &a)]), fast_config()).unwrap();

    let first = search.search(&fe_o()).await.unwrap();
    // Built in a different order; same canonical query.
    let again = Query::builder()
        .elements(["o", "fe"])
        .limit(10)
        .build()
        .unwrap();
    let second = search.search(&again).await.unwrap();

    assert_eq!(a.calls(), 1);
    assert!(second.cached);
    assert_eq!(second.materials, first.materials);
}

#[tokio::test]
async fn force_refresh_queries_providers_again() {
    let a = MockClient::new(Reply::Records(vec![hematite("a", "a-1")]));
    let search = FederatedSearch::in_memory(registry(&[("a", &a)]), fast_config()).unwrap();

    search.search(&fe_o()).await.unwrap();
    let refreshed = search
        .search_with(&fe_o(), SearchOptions::refresh())
        .await
        .unwrap();

    assert_eq!(a.calls(), 2);
    assert!(!refreshed.cached);
}

#[tokio::test]
async fn partial_failure_still_returns_results() {
    let ok1 = MockClient::new(Reply::Records(vec![hematite("ok1", "1")]));
    let ok2 = MockClient::new(Reply::Records(vec![RawRecord::new("ok2", "9").with_formula("FeO")]));
    let slow1 = MockClient::new(Reply::Hang);
    let slow2 = MockClient::new(Reply::Hang);
    let broken = MockClient::new(Reply::Malformed);
    let search = FederatedSearch::in_memory(
        registry(&[
            ("ok1", &ok1),
            ("ok2", &ok2),
            ("slow1", &slow1),
            ("slow2", &slow2),
            ("broken", &broken),
        ]),
        fast_config(),
    )
    .unwrap();

    let result = search.search(&fe_o()).await.unwrap();

    assert_eq!(result.materials.len(), 2);
    assert_eq!(result.provider_logs.len(), 5);
    let failed: Vec<_> = result.failed_providers().collect();
    assert_eq!(failed.len(), 3);
    let status_of = |id: &str| {
        result
            .provider_logs
            .iter()
            .find(|l| l.provider == id)
            .map(|l| l.status)
    };
    assert_eq!(status_of("slow1"), Some(ProviderStatus::Timeout));
    assert_eq!(status_of("slow2"), Some(ProviderStatus::Timeout));
    assert_eq!(status_of("broken"), Some(ProviderStatus::ParseError));
    assert!(result.warnings.iter().any(|w| w.starts_with("broken:")));
}

#[tokio::test]
async fn failing_provider_is_short_circuited() {
    let good = MockClient::new(Reply::Records(vec![hematite("good", "1")]));
    let down = MockClient::new(Reply::Down);
    let search =
        FederatedSearch::in_memory(registry(&[("good", &good), ("down", &down)]), fast_config())
            .unwrap();

    for _ in 0..3 {
        let result = search
            .search_with(&fe_o(), SearchOptions::refresh())
            .await
            .unwrap();
        let log = result.provider_logs.iter().find(|l| l.provider == "down").unwrap();
        assert_eq!(log.status, ProviderStatus::HttpError);
    }
    assert_eq!(search.provider_status("down"), CircuitState::Open);

    let result = search
        .search_with(&fe_o(), SearchOptions::refresh())
        .await
        .unwrap();
    assert_eq!(down.calls(), 3);
    let log = result.provider_logs.iter().find(|l| l.provider == "down").unwrap();
    assert_eq!(log.status, ProviderStatus::CircuitOpen);
    assert_eq!(log.latency_ms, 0);
    assert_eq!(result.materials.len(), 1);
    assert_eq!(search.provider_status("good"), CircuitState::Closed);
}

#[tokio::test]
async fn allow_list_restricts_and_orders_providers() {
    let a = MockClient::new(Reply::Records(vec![
        hematite("a", "a-1").with_property("band_gap", RawProperty::new(2.0)),
    ]));
    let b = MockClient::new(Reply::Records(vec![
        hematite("b", "b-1").with_property("band_gap", RawProperty::new(2.4)),
    ]));
    let c = MockClient::new(Reply::Records(vec![hematite("c", "c-1")]));
    let search = FederatedSearch::in_memory(
        registry(&[("a", &a), ("b", &b), ("c", &c)]),
        fast_config(),
    )
    .unwrap();

    let query = Query::builder()
        .elements(["Fe", "O"])
        .providers(["b", "a", "nope"])
        .build()
        .unwrap();
    let result = search.search(&query).await.unwrap();

    assert_eq!(c.calls(), 0);
    let material = &result.materials[0];
    assert_eq!(material.property("band_gap").unwrap().source, "b");
    assert_eq!(material.extra_properties["band_gap"][0].value, 2.0);
    assert!(result.warnings.iter().any(|w| w.contains("nope")));
}

#[tokio::test]
async fn incapable_provider_is_skipped_not_queried() {
    let plain = MockClient::new(Reply::Records(vec![hematite("plain", "1")]));
    let gapped = MockClient::new(Reply::Records(vec![
        hematite("gapped", "2").with_property("band_gap", RawProperty::new(2.1)),
    ]));
    let registry = ProviderRegistry::from_parts(vec![
        (
            ProviderEndpoint::new("plain", "https://plain.example"),
            Arc::clone(&plain) as Arc<dyn ProviderClient>,
        ),
        (
            ProviderEndpoint::new("gapped", "https://gapped.example")
                .with_property(Property::BandGap, "_g_band_gap"),
            Arc::clone(&gapped) as Arc<dyn ProviderClient>,
        ),
    ]);
    let search = FederatedSearch::in_memory(registry, fast_config()).unwrap();

    let query = Query::builder()
        .elements(["Fe", "O"])
        .property(Property::BandGap, PropertyRange::between(1.0, 3.0))
        .build()
        .unwrap();
    let result = search.search(&query).await.unwrap();

    assert_eq!(plain.calls(), 0);
    assert_eq!(gapped.calls(), 1);
    let skipped = result
        .provider_logs
        .iter()
        .find(|l| l.provider == "plain")
        .unwrap();
    assert_eq!(skipped.status, ProviderStatus::Skipped);
    assert!(skipped.error.as_deref().unwrap().contains("band_gap"));
    assert_eq!(result.materials[0].sources, vec!["gapped"]);
}

#[tokio::test]
async fn cancellation_returns_cancelled_and_caches_nothing() {
    let stuck = MockClient::new(Reply::Hang);
    let config = SearchConfig {
        timeout_seconds: 30,
        ..Default::default()
    };
    let search = FederatedSearch::in_memory(registry(&[("stuck", &stuck)]), config).unwrap();

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = search
        .search_cancellable(&fe_o(), SearchOptions::default(), token)
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::Cancelled));
    assert_eq!(search.provider_status("stuck"), CircuitState::Closed);
    assert!(search.health_report().is_empty());
}

#[tokio::test]
async fn cache_and_health_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = dir.path().join("queries");
    let health_path = dir.path().join("health.json");
    let config = fast_config();

    let a = MockClient::new(Reply::Records(vec![hematite("a", "a-1")]));
    let down = MockClient::new(Reply::Down);
    let first = FederatedSearch::new(
        registry(&[("a", &a), ("down", &down)]),
        HealthManager::load(config.circuit_breaker.clone(), &health_path),
        SearchCache::open(&cache_dir, config.cache_ttl_seconds),
        config.clone(),
    )
    .unwrap();
    let result = first.search(&fe_o()).await.unwrap();
    let material_id = result.materials[0].id.clone();
    assert!(health_path.exists());

    let a2 = MockClient::new(Reply::Records(vec![]));
    let down2 = MockClient::new(Reply::Down);
    let second = FederatedSearch::new(
        registry(&[("a", &a2), ("down", &down2)]),
        HealthManager::load(config.circuit_breaker.clone(), &health_path),
        SearchCache::open(&cache_dir, config.cache_ttl_seconds),
        config,
    )
    .unwrap();

    let cached = second.search(&fe_o()).await.unwrap();
    assert!(cached.cached);
    assert_eq!(a2.calls(), 0);
    assert!(second.lookup_material(&material_id).is_some());

    let report = second.health_report();
    let down_health = report
        .iter()
        .find(|(id, _)| id == "down")
        .map(|(_, h)| h)
        .unwrap();
    assert_eq!(down_health.consecutive_failures, 1);
}
