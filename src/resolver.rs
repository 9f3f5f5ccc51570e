//! The fallback ladder: cache, primary provider, secondary provider,
//! street-centroid, admin-centroid, static county-centroid table. Tiers run
//! in strict order and the first result passing region validation wins.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, ResultCache};
use crate::candidates::{self, Candidate};
use crate::errors::AppResult;
use crate::normalize;
use crate::provider::{GeocodeProvider, ProviderHit};
use crate::records::{ApproximationLevel, Record, Resolution, ResolvedRecord, Source};
use crate::region::{self, RegionParts};
use crate::resilience::{BackoffPolicy, RateLimiter};

const JITTER_MS: u64 = 250;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolveStats {
    pub total: usize,
    pub resolved: usize,
    pub cache_hits: usize,
    pub provider_calls: usize,
    pub approximate: usize,
    pub misses: usize,
}

/// Owns the result cache for the duration of a batch run and drives each
/// record through the tiers. One logical worker: records and candidates are
/// processed strictly sequentially.
pub struct Resolver {
    cache: ResultCache,
    primary: Arc<dyn GeocodeProvider>,
    secondary: Option<Arc<dyn GeocodeProvider>>,
    limiter: RateLimiter,
    backoff: BackoffPolicy,
    jitter_rng: Mutex<StdRng>,
    calls: AtomicUsize,
}

impl Resolver {
    pub fn new(
        cache: ResultCache,
        primary: Arc<dyn GeocodeProvider>,
        secondary: Option<Arc<dyn GeocodeProvider>>,
        limiter: RateLimiter,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            cache,
            primary,
            secondary,
            limiter,
            backoff,
            jitter_rng: Mutex::new(StdRng::from_entropy()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Outbound provider calls made so far, retries included.
    pub fn provider_call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Resolves a whole batch sequentially. Per-record lookup failures never
    /// abort the run; only infrastructure failures (cache storage) do.
    pub async fn resolve_all(&self, records: &[Record]) -> AppResult<(Vec<ResolvedRecord>, ResolveStats)> {
        let mut stats = ResolveStats {
            total: records.len(),
            ..ResolveStats::default()
        };
        let mut rows = Vec::with_capacity(records.len());

        for (index, record) in records.iter().enumerate() {
            let calls_before = self.provider_call_count();
            let resolution = self.resolve_record(record).await?;
            stats.provider_calls += self.provider_call_count() - calls_before;

            match resolution.source {
                Some(source) => {
                    stats.resolved += 1;
                    if source == Source::Cache {
                        stats.cache_hits += 1;
                    }
                    if resolution.approximation.is_some() {
                        stats.approximate += 1;
                    }
                    info!(
                        index = index + 1,
                        total = records.len(),
                        org = %record.org_name,
                        source = source.as_str(),
                        query = resolution.query_used.as_deref().unwrap_or(""),
                        "resolved"
                    );
                }
                None => {
                    stats.misses += 1;
                    warn!(
                        index = index + 1,
                        total = records.len(),
                        org = %record.org_name,
                        address = %record.address,
                        "no result"
                    );
                }
            }

            rows.push(ResolvedRecord {
                record: record.clone(),
                resolution,
            });
        }

        Ok((rows, stats))
    }

    /// Runs one record through the ladder to a resolution or an explicit
    /// miss. Never aborted mid-record.
    pub async fn resolve_record(&self, record: &Record) -> AppResult<Resolution> {
        // Region extraction anchors at the string start, so the postal
        // prefix has to go before anything else looks at the address.
        let address = normalize::strip_postal_prefix(&record.address);
        let parts = region::extract(&address);
        let expected = record
            .county
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| parts.county.clone());
        let bias = region::county_centroid(&expected);

        // Precision tiers only consume address-shaped candidates; degraded
        // ones belong to the fallback tiers.
        let cands: Vec<Candidate> = candidates::generate(&address, &record.org_name)
            .into_iter()
            .filter(|c| !c.degraded)
            .collect();
        debug!(
            org = %record.org_name,
            candidates = cands.len(),
            expected = %expected,
            "generated candidate queries"
        );

        // Tier 1: cache over the full candidate list.
        for candidate in &cands {
            if let Some(resolution) = self.cached(&expected, candidate)? {
                return Ok(resolution);
            }
        }

        // Tiers 2-3: providers over the full candidate list.
        if let Some(resolution) = self
            .provider_pass(self.primary.as_ref(), &cands, bias, &expected, Source::PrimaryProvider, None)
            .await?
        {
            return Ok(resolution);
        }
        if let Some(secondary) = &self.secondary {
            if let Some(resolution) = self
                .provider_pass(secondary.as_ref(), &cands, None, &expected, Source::SecondaryProvider, None)
                .await?
            {
                return Ok(resolution);
            }
        }

        // Tier 4: street-centroid queries, widest usable shape with a road.
        let street = candidates::street_candidates(&address);
        if let Some(resolution) = self
            .provider_pass(
                self.primary.as_ref(),
                &street,
                bias,
                &expected,
                Source::StreetFallback,
                Some(ApproximationLevel::Street),
            )
            .await?
        {
            return Ok(resolution);
        }
        if let Some(secondary) = &self.secondary {
            if let Some(resolution) = self
                .provider_pass(
                    secondary.as_ref(),
                    &street,
                    None,
                    &expected,
                    Source::StreetFallback,
                    Some(ApproximationLevel::Street),
                )
                .await?
            {
                return Ok(resolution);
            }
        }

        // Tier 5: administrative queries against the primary.
        let admin_parts = RegionParts {
            county: expected.clone(),
            district: parts.district.clone(),
        };
        let admin = candidates::admin_candidates(&admin_parts);
        if let Some(resolution) = self
            .provider_pass(
                self.primary.as_ref(),
                &admin,
                bias,
                &expected,
                Source::AdminFallback,
                Some(ApproximationLevel::Admin),
            )
            .await?
        {
            return Ok(resolution);
        }

        // Tier 6: static county centroid, the guaranteed terminal state for
        // any record with an identifiable region.
        if let Some((lat, lng)) = region::county_centroid(&expected) {
            let canonical = region::to_tai_canonical(&expected);
            return Ok(Resolution {
                lat: Some(lat),
                lng: Some(lng),
                confidence: None,
                formatted: None,
                components: BTreeMap::from([("county".to_string(), canonical.clone())]),
                source: Some(Source::StaticCentroid),
                approximation: Some(ApproximationLevel::RegionTable),
                query_used: Some(canonical),
                miss_reason: None,
            });
        }

        Ok(Resolution::miss("unresolvable"))
    }

    fn cached(&self, expected: &str, candidate: &Candidate) -> AppResult<Option<Resolution>> {
        let Some(entry) = self.cache.get(&candidate.query)? else {
            return Ok(None);
        };
        if !self.validates(expected, entry.lat, entry.lng, entry.formatted.as_deref(), &entry.components) {
            return Ok(None);
        }
        Ok(Some(resolution_from_entry(&entry, Source::Cache, &candidate.query)))
    }

    /// One provider over one candidate list: cache first (the store is
    /// consulted before every network attempt), then the network, validating
    /// and caching any accepted result.
    async fn provider_pass(
        &self,
        provider: &dyn GeocodeProvider,
        cands: &[Candidate],
        bias: Option<(f64, f64)>,
        expected: &str,
        source: Source,
        approximation: Option<ApproximationLevel>,
    ) -> AppResult<Option<Resolution>> {
        for candidate in cands {
            if let Some(resolution) = self.cached(expected, candidate)? {
                return Ok(Some(resolution));
            }

            let Some(hit) = self.call_provider(provider, &candidate.query, bias).await else {
                continue;
            };
            if !self.validates(expected, hit.lat, hit.lng, hit.formatted.as_deref(), &hit.components) {
                debug!(
                    provider = provider.name(),
                    query = %candidate.query,
                    expected,
                    "result failed region validation"
                );
                continue;
            }

            let entry = CacheEntry {
                lat: hit.lat,
                lng: hit.lng,
                confidence: hit.confidence,
                formatted: hit.formatted,
                components: hit.components,
                source,
                approximation,
            };
            self.cache.upsert(&candidate.query, &entry)?;
            return Ok(Some(resolution_from_entry(&entry, source, &candidate.query)));
        }
        Ok(None)
    }

    /// A result is accepted only when it lands inside Taiwan and its
    /// reported region contains the expected county in either 臺/台 form.
    /// With no expected county there is nothing to check against, so
    /// validation passes.
    fn validates(
        &self,
        expected: &str,
        lat: f64,
        lng: f64,
        formatted: Option<&str>,
        components: &BTreeMap<String, String>,
    ) -> bool {
        if !region::within_taiwan(lat, lng) {
            return false;
        }
        if expected.is_empty() {
            return true;
        }
        components
            .values()
            .any(|value| region::contains_tai_equivalent(value, expected))
            || formatted.is_some_and(|f| region::contains_tai_equivalent(f, expected))
    }

    /// Rate-limited, retried provider call. Transient failures back off
    /// linearly; exhaustion or a definitive rejection downgrades to "this
    /// candidate failed" so the ladder keeps moving.
    async fn call_provider(
        &self,
        provider: &dyn GeocodeProvider,
        query: &str,
        bias: Option<(f64, f64)>,
    ) -> Option<ProviderHit> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.wait().await;
            self.calls.fetch_add(1, Ordering::SeqCst);
            match provider.resolve(query, bias).await {
                Ok(hit) => return hit,
                Err(err) if err.is_transient() && attempt <= self.backoff.max_retries => {
                    let delay = self.backoff.delay(attempt) + self.jitter();
                    warn!(
                        provider = provider.name(),
                        query,
                        attempt,
                        ?err,
                        "transient lookup failure; retrying after {:?}",
                        delay
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    warn!(provider = provider.name(), query, ?err, "lookup failed; moving on");
                    return None;
                }
            }
        }
    }

    fn jitter(&self) -> Duration {
        let mut rng = self.jitter_rng.lock();
        Duration::from_millis(rng.gen_range(0..JITTER_MS))
    }
}

fn resolution_from_entry(entry: &CacheEntry, source: Source, query: &str) -> Resolution {
    Resolution {
        lat: Some(entry.lat),
        lng: Some(entry.lng),
        confidence: entry.confidence,
        formatted: entry.formatted.clone(),
        components: entry.components.clone(),
        source: Some(source),
        approximation: entry.approximation,
        query_used: Some(query.to_string()),
        miss_reason: None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use serde_json::Map;

    use super::*;
    use crate::errors::AppError;

    fn record(org_name: &str, address: &str, county: Option<&str>) -> Record {
        Record {
            org_name: org_name.to_string(),
            address: address.to_string(),
            county: county.map(str::to_string),
            extra: Map::new(),
        }
    }

    fn hit(county: &str, lat: f64, lng: f64) -> ProviderHit {
        ProviderHit {
            lat,
            lng,
            confidence: Some(9.0),
            formatted: Some(format!("{county}某處")),
            components: BTreeMap::from([("county".to_string(), county.to_string())]),
        }
    }

    struct ScriptedProvider {
        hits: HashMap<String, ProviderHit>,
        biases: Mutex<Vec<Option<(f64, f64)>>>,
    }

    impl ScriptedProvider {
        fn new(hits: HashMap<String, ProviderHit>) -> Self {
            Self {
                hits,
                biases: Mutex::new(Vec::new()),
            }
        }

        fn empty() -> Self {
            Self::new(HashMap::new())
        }
    }

    #[async_trait]
    impl GeocodeProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn resolve(
            &self,
            query: &str,
            bias: Option<(f64, f64)>,
        ) -> AppResult<Option<ProviderHit>> {
            self.biases.lock().push(bias);
            Ok(self.hits.get(query).cloned())
        }
    }

    /// Always answers with a coordinate in the wrong county.
    struct WrongRegionProvider;

    #[async_trait]
    impl GeocodeProvider for WrongRegionProvider {
        fn name(&self) -> &'static str {
            "wrong-region"
        }

        async fn resolve(&self, _query: &str, _bias: Option<(f64, f64)>) -> AppResult<Option<ProviderHit>> {
            Ok(Some(hit("高雄市", 22.6273, 120.3014)))
        }
    }

    /// Fails with 429 a fixed number of times, then answers.
    struct FlakyProvider {
        failures: AtomicUsize,
        hit: ProviderHit,
    }

    #[async_trait]
    impl GeocodeProvider for FlakyProvider {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn resolve(&self, _query: &str, _bias: Option<(f64, f64)>) -> AppResult<Option<ProviderHit>> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                Err(AppError::ProviderStatus(429))
            } else {
                Ok(Some(self.hit.clone()))
            }
        }
    }

    fn resolver(primary: Arc<dyn GeocodeProvider>, secondary: Option<Arc<dyn GeocodeProvider>>) -> Resolver {
        Resolver::new(
            ResultCache::in_memory().unwrap(),
            primary,
            secondary,
            RateLimiter::new(0),
            BackoffPolicy::new(3, Duration::from_millis(10)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn accepts_road_only_reduced_form_with_proximity_bias() {
        let reduced = "桃園市中壢區中山路100號";
        let primary = Arc::new(ScriptedProvider::new(HashMap::from([(
            reduced.to_string(),
            hit("桃園市", 24.9537, 121.2255),
        )])));
        let resolver = resolver(primary.clone(), None);

        let resolution = resolver
            .resolve_record(&record("", "桃園市中壢區中山路25巷100號", None))
            .await
            .unwrap();

        assert_eq!(resolution.source, Some(Source::PrimaryProvider));
        assert_eq!(resolution.approximation, None);
        assert_eq!(resolution.query_used.as_deref(), Some(reduced));
        assert_eq!(
            primary.biases.lock().first().copied().flatten(),
            region::county_centroid("桃園市")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_house_number_terminates_at_region_centroid() {
        let resolver = resolver(Arc::new(ScriptedProvider::empty()), None);

        let resolution = resolver
            .resolve_record(&record("某診所", "臺南市永康區中華路", None))
            .await
            .unwrap();

        assert_eq!(resolution.source, Some(Source::StaticCentroid));
        assert_eq!(resolution.approximation, Some(ApproximationLevel::RegionTable));
        let (lat, lng) = (resolution.lat.unwrap(), resolution.lng.unwrap());
        assert!(region::within_taiwan(lat, lng));
        assert_eq!(Some((lat, lng)), region::county_centroid("臺南市"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_house_number_can_still_resolve_administratively() {
        let primary = Arc::new(ScriptedProvider::new(HashMap::from([(
            "臺南市永康區".to_string(),
            hit("臺南市", 23.0264, 120.2568),
        )])));
        let resolver = resolver(primary, None);

        let resolution = resolver
            .resolve_record(&record("", "臺南市永康區中華路", None))
            .await
            .unwrap();

        assert_eq!(resolution.source, Some(Source::AdminFallback));
        assert_eq!(resolution.approximation, Some(ApproximationLevel::Admin));
    }

    #[tokio::test(start_paused = true)]
    async fn validation_accepts_alternate_ideograph_forms() {
        let primary = Arc::new(ScriptedProvider::new(HashMap::from([(
            "臺南市東區東門路100號".to_string(),
            hit("臺南市", 22.9869, 120.2268),
        )])));
        let resolver = resolver(primary, None);

        // The record writes 台南市; the provider only knows 臺南市.
        let resolution = resolver
            .resolve_record(&record("", "台南市東區東門路100號", None))
            .await
            .unwrap();

        assert_eq!(resolution.source, Some(Source::PrimaryProvider));
        assert_eq!(resolution.approximation, None);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_region_results_fall_through_to_centroid() {
        let resolver = resolver(Arc::new(WrongRegionProvider), Some(Arc::new(WrongRegionProvider)));

        let resolution = resolver
            .resolve_record(&record("", "臺南市永康區中華路100號", None))
            .await
            .unwrap();

        assert!(resolver.provider_call_count() > 0);
        assert_eq!(resolution.source, Some(Source::StaticCentroid));
        assert_eq!(resolution.approximation, Some(ApproximationLevel::RegionTable));
        assert_eq!(
            (resolution.lat, resolution.lng),
            (Some(22.9999), Some(120.2270))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn warm_cache_resolves_without_provider_calls() {
        let address = "臺南市永康區中華路100號";
        let primary = Arc::new(ScriptedProvider::new(HashMap::from([(
            address.to_string(),
            hit("臺南市", 23.0264, 120.2568),
        )])));
        let resolver = resolver(primary, None);

        let first = resolver.resolve_record(&record("", address, None)).await.unwrap();
        assert_eq!(first.source, Some(Source::PrimaryProvider));
        let calls_after_first = resolver.provider_call_count();
        assert_eq!(calls_after_first, 1);

        let second = resolver.resolve_record(&record("", address, None)).await.unwrap();
        assert_eq!(second.source, Some(Source::Cache));
        assert_eq!(resolver.provider_call_count(), calls_after_first);
        assert_eq!((second.lat, second.lng), (first.lat, first.lng));

        // Warm-cache resolution is idempotent.
        let third = resolver.resolve_record(&record("", address, None)).await.unwrap();
        assert_eq!(third, second);
        assert_eq!(resolver.provider_call_count(), calls_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn street_fallback_results_are_cached_with_their_level() {
        let street_query = "臺南市永康區中華路1段";
        let primary = Arc::new(ScriptedProvider::new(HashMap::from([(
            street_query.to_string(),
            hit("臺南市", 23.0301, 120.2502),
        )])));
        let resolver = resolver(primary, None);
        let rec = record("", "臺南市永康區中華路一段100號", None);

        let first = resolver.resolve_record(&rec).await.unwrap();
        assert_eq!(first.source, Some(Source::StreetFallback));
        assert_eq!(first.approximation, Some(ApproximationLevel::Street));
        assert_eq!(first.query_used.as_deref(), Some(street_query));

        let second = resolver.resolve_record(&rec).await.unwrap();
        assert_eq!(second.source, Some(Source::Cache));
        assert_eq!(second.approximation, Some(ApproximationLevel::Street));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_then_accepted() {
        let primary = Arc::new(FlakyProvider {
            failures: AtomicUsize::new(2),
            hit: hit("臺南市", 23.0264, 120.2568),
        });
        let resolver = resolver(primary, None);

        let resolution = resolver
            .resolve_record(&record("", "臺南市永康區中華路100號", None))
            .await
            .unwrap();

        assert_eq!(resolution.source, Some(Source::PrimaryProvider));
        assert_eq!(resolver.provider_call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn postal_prefixed_address_still_reaches_region_centroid() {
        let resolver = resolver(Arc::new(ScriptedProvider::empty()), None);

        let resolution = resolver
            .resolve_record(&record("某診所", "710臺南市永康區中華路100號", None))
            .await
            .unwrap();

        assert_eq!(resolution.source, Some(Source::StaticCentroid));
        assert_eq!(resolution.approximation, Some(ApproximationLevel::RegionTable));
        let (lat, lng) = region::county_centroid("臺南市").unwrap();
        assert_eq!((resolution.lat, resolution.lng), (Some(lat), Some(lng)));
    }

    #[tokio::test(start_paused = true)]
    async fn postal_prefixed_address_resolves_like_its_clean_form() {
        let address = "臺南市永康區中華路100號";
        let primary = Arc::new(ScriptedProvider::new(HashMap::from([(
            address.to_string(),
            hit("臺南市", 23.0264, 120.2568),
        )])));
        let resolver = resolver(primary, None);

        let resolution = resolver
            .resolve_record(&record("", &format!("710 {address}"), None))
            .await
            .unwrap();

        assert_eq!(resolution.source, Some(Source::PrimaryProvider));
        assert_eq!(resolution.query_used.as_deref(), Some(address));
    }

    #[tokio::test(start_paused = true)]
    async fn three_retries_means_four_calls() {
        let primary = Arc::new(FlakyProvider {
            failures: AtomicUsize::new(3),
            hit: hit("臺南市", 23.0264, 120.2568),
        });
        let resolver = resolver(primary, None);

        let resolution = resolver
            .resolve_record(&record("", "臺南市永康區中華路100號", None))
            .await
            .unwrap();

        assert_eq!(resolution.source, Some(Source::PrimaryProvider));
        assert_eq!(resolver.provider_call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unresolvable_records_get_an_explicit_miss() {
        let resolver = resolver(Arc::new(ScriptedProvider::empty()), None);

        let resolution = resolver.resolve_record(&record("某單位", "辦公室", None)).await.unwrap();

        assert!(resolution.is_miss());
        assert_eq!(resolution.lat, None);
        assert_eq!(resolution.lng, None);
        assert_eq!(resolution.miss_reason.as_deref(), Some("unresolvable"));
        assert_eq!(resolver.provider_call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn record_county_field_supplies_the_expected_region() {
        let resolver = resolver(Arc::new(ScriptedProvider::empty()), None);

        let resolution = resolver
            .resolve_record(&record("", "中山路100號", Some("桃園市")))
            .await
            .unwrap();

        assert_eq!(resolution.source, Some(Source::StaticCentroid));
        let (lat, lng) = region::county_centroid("桃園市").unwrap();
        assert_eq!((resolution.lat, resolution.lng), (Some(lat), Some(lng)));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_stats_count_sources_and_misses() {
        let address = "臺南市永康區中華路100號";
        let primary = Arc::new(ScriptedProvider::new(HashMap::from([(
            address.to_string(),
            hit("臺南市", 23.0264, 120.2568),
        )])));
        let resolver = resolver(primary, None);

        let records = vec![
            record("甲診所", address, None),
            record("乙診所", address, None),
            record("丙單位", "辦公室", None),
        ];
        let (rows, stats) = resolver.resolve_all(&records).await.unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.resolved, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.provider_calls, 1);
        assert_eq!(stats.misses, 1);
        assert!(rows[2].resolution.is_miss());
        // Either both coordinates are present or both are null.
        for row in &rows {
            assert_eq!(row.resolution.lat.is_some(), row.resolution.lng.is_some());
            assert_eq!(row.resolution.lat.is_some(), row.resolution.source.is_some());
        }
    }
}
