//! Authoritative query pipeline.
//!
//! The order of operations per query: response-cache check, zone suffix
//! match (via the zone cache), RRSet lookup, CNAME fallback, Geo
//! selection, answer composition, positive caching; unresolved queries
//! fall through to the forwarder and negative responses are cached for
//! five minutes.

use crate::forwarder::Forwarder;
use crate::{QueryContext, QueryHandler};
use async_trait::async_trait;
use meridian_cache::{response_key, ResponseCache, ZoneCache, ZoneEntry, NEGATIVE_TTL};
use meridian_geo::{select_geo_records, GeoInfo, Provider, SelectionRule};
use meridian_proto::{Message, Question, RecordType, ResourceRecord, ResponseCode};
use meridian_store::{RecordData, Store};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tuning knobs for the pipeline, straight from configuration.
#[derive(Debug, Clone, Default)]
pub struct AuthorityConfig {
    /// Prefer the EDNS Client Subnet address over the transport peer.
    pub use_ecs: bool,
    /// Log geo and selection-rule detail per query.
    pub verbose: bool,
}

/// The authoritative handler: resolves questions from the store with
/// Geo-aware selection, caching and forwarder fallback.
pub struct AuthorityHandler {
    store: Store,
    response_cache: Arc<ResponseCache>,
    zone_cache: Arc<ZoneCache>,
    geo: Arc<dyn Provider>,
    forwarder: Option<Forwarder>,
    config: AuthorityConfig,
}

struct LocalAnswer {
    records: Vec<ResourceRecord>,
    ttl: u32,
    rule: SelectionRule,
}

impl AuthorityHandler {
    /// Creates the handler.
    pub fn new(
        store: Store,
        response_cache: Arc<ResponseCache>,
        zone_cache: Arc<ZoneCache>,
        geo: Arc<dyn Provider>,
        forwarder: Option<Forwarder>,
        config: AuthorityConfig,
    ) -> Self {
        Self {
            store,
            response_cache,
            zone_cache,
            geo,
            forwarder,
            config,
        }
    }

    /// The zone cache, for wiring invalidation.
    pub fn zone_cache(&self) -> Arc<ZoneCache> {
        self.zone_cache.clone()
    }

    /// The response cache, for wiring invalidation.
    pub fn response_cache(&self) -> Arc<ResponseCache> {
        self.response_cache.clone()
    }

    /// Determines the client IP used for Geo scoping: the ECS address
    /// when enabled and present, the transport peer otherwise.
    fn client_ip(&self, query: &Message, context: &QueryContext) -> Option<IpAddr> {
        if self.config.use_ecs {
            if let Some(addr) = query.ecs_addr() {
                return Some(addr);
            }
        }
        Some(context.client.ip())
    }

    /// Loads the zone list, from cache or store, and finds the first
    /// zone whose name is a suffix of `qname`. The list is ordered
    /// longest name first, so the most specific zone wins.
    async fn match_zone(&self, qname: &str) -> Option<ZoneEntry> {
        let zones = match self.zone_cache.get() {
            Some(zones) => zones,
            None => {
                let loaded = match self.store.zone_names_longest_first().await {
                    Ok(pairs) => pairs
                        .into_iter()
                        .map(|(id, name)| ZoneEntry { id, name })
                        .collect::<Vec<_>>(),
                    Err(e) => {
                        warn!(error = %e, "zone list load failed");
                        return None;
                    }
                };
                self.zone_cache.set(loaded.clone());
                loaded
            }
        };

        zones
            .into_iter()
            .find(|zone| qname == zone.name || qname.ends_with(&zone.name))
    }

    /// Resolves a question against the store.
    async fn resolve_local(&self, question: &Question, geo: &GeoInfo, client_ip: Option<IpAddr>) -> Option<LocalAnswer> {
        let qname = question.qname.to_string();
        let qtype = question.qtype;
        let zone = self.match_zone(&qname).await?;
        let apex = zone.name.clone();

        let set = match self
            .store
            .lookup_rrset(zone.id, &qname, &qtype.mnemonic())
            .await
        {
            Ok(set) => set,
            Err(e) => {
                warn!(error = %e, qname = %qname, "rrset lookup failed");
                None
            }
        };

        let Some(set) = set else {
            // CNAME fallback: return the CNAME RRSet for this name and
            // let the resolver chase it.
            let cname = self
                .store
                .lookup_rrset(zone.id, &qname, "CNAME")
                .await
                .ok()
                .flatten()?;
            let records = compose_answers(
                &qname,
                cname.ttl,
                RecordType::Cname,
                &cname.records,
                &apex,
            );
            if records.is_empty() {
                return None;
            }
            return Some(LocalAnswer {
                records,
                ttl: cname.ttl,
                rule: SelectionRule::None,
            });
        };

        let (selected, rule) = select_geo_records(&set.records, client_ip, geo);
        let records = compose_answers(&qname, set.ttl, qtype, &selected, &apex);
        if records.is_empty() {
            return None;
        }
        Some(LocalAnswer {
            records,
            ttl: set.ttl,
            rule,
        })
    }
}

/// Composes wire answers from stored record text. A record whose rdata
/// fails to parse is skipped rather than failing the whole answer.
fn compose_answers(
    qname: &str,
    ttl: u32,
    rtype: RecordType,
    records: &[RecordData],
    zone_apex: &str,
) -> Vec<ResourceRecord> {
    let mut answers = Vec::with_capacity(records.len());
    for record in records {
        // "@" in CNAME data is shorthand for the zone apex.
        let data = if rtype == RecordType::Cname && record.data.trim() == "@" {
            zone_apex.to_string()
        } else {
            record.data.clone()
        };

        match ResourceRecord::from_text(qname, ttl, rtype, &data) {
            Ok(rr) => answers.push(rr),
            Err(e) => {
                debug!(qname = %qname, rtype = %rtype, error = %e, "skipping unparsable rdata");
            }
        }
    }
    answers
}

#[async_trait]
impl QueryHandler for AuthorityHandler {
    async fn handle(&self, query: Message, context: QueryContext) -> Message {
        let mut response = Message::response_from(&query);
        response.set_authoritative(true);

        // One question per message; an empty question section gets an
        // empty reply with no rcode change.
        let Some(question) = query.questions().first().cloned() else {
            return response;
        };

        // Names are case-insensitive; the parsed qname is already
        // lowercase, which also keeps the cache key canonical.
        let qname = question.qname.to_string();
        let qtype = question.qtype;
        let client_ip = self.client_ip(&query, &context);
        let geo = self.geo.lookup(client_ip);

        let key = response_key(&qname, qtype.to_u16(), client_ip);
        if let Some(mut cached) = self.response_cache.get(&key) {
            info!(
                q = %qname,
                qtype = %qtype,
                client = %context.client,
                id = query.id(),
                "query answered from cache"
            );
            cached.set_id(query.id());
            cached.set_questions(query.questions().to_vec());
            return cached;
        }

        // Resolve locally.
        if let Some(answer) = self.resolve_local(&question, &geo, client_ip).await {
            if self.config.verbose {
                info!(
                    q = %qname,
                    qtype = %qtype,
                    client = %context.client,
                    country = %geo.country,
                    continent = %geo.continent,
                    asn = geo.asn,
                    rule = %answer.rule,
                    answers = answer.records.len(),
                    ttl = answer.ttl,
                    id = query.id(),
                    "query answered"
                );
            } else {
                info!(
                    q = %qname,
                    qtype = %qtype,
                    client = %context.client,
                    answers = answer.records.len(),
                    ttl = answer.ttl,
                    id = query.id(),
                    "query answered"
                );
            }

            for rr in answer.records {
                response.add_answer(rr);
            }
            if answer.ttl > 0 {
                self.response_cache
                    .set(&key, &response, Duration::from_secs(answer.ttl as u64));
            }
            return response;
        }

        // Forward on local miss.
        if let Some(forwarder) = &self.forwarder {
            match forwarder.exchange(&question).await {
                Ok(mut upstream) => {
                    info!(
                        q = %qname,
                        qtype = %qtype,
                        client = %context.client,
                        upstream = %forwarder.upstream(),
                        rcode = %upstream.rcode(),
                        id = query.id(),
                        "query forwarded"
                    );
                    upstream.set_id(query.id());
                    // Negative answers are cached briefly to shed
                    // repeated upstream misses.
                    if upstream.rcode() != ResponseCode::NoError {
                        self.response_cache.set(&key, &upstream, NEGATIVE_TTL);
                    }
                    return upstream;
                }
                Err(e) => {
                    warn!(q = %qname, error = %e, "forwarder exchange failed");
                }
            }
        }

        info!(
            q = %qname,
            qtype = %qtype,
            client = %context.client,
            id = query.id(),
            "query unresolved"
        );
        response.set_rcode(ResponseCode::NXDomain);
        self.response_cache.set(&key, &response, NEGATIVE_TTL);
        response
    }
}
