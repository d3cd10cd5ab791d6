//! Discovery & dedup engine: feeds new contacts into the pipeline.
//!
//! Walks a (niche × geography) query matrix against the directory
//! provider. The current matrix position is persisted in PipelineState
//! so successive runs advance instead of restarting, wrapping only
//! after the full matrix is exhausted. A single failing query is
//! logged and the cursor still advances; the pass is never stuck on
//! one bad query.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::DiscoveryConfig;
use crate::domain::{normalize_name, Contact, ContactStatus};
use crate::providers::{DirectoryProvider, DirectoryResult};
use crate::store::{ContactStore, StoreError};

/// Counts for one discovery pass
#[derive(Debug, Clone, Default)]
pub struct DiscoverySummary {
    /// Matrix positions consumed
    pub queries: usize,
    /// Raw listings fetched from the directory
    pub listings: usize,
    /// New contacts inserted
    pub inserted: usize,
    /// Candidates excluded by dedup
    pub duplicates: usize,
    /// Candidates with no contact path after enrichment
    pub dropped: usize,
    /// Queries that failed (cursor advanced anyway)
    pub failures: usize,
}

/// What happened to one directory listing
enum CandidateOutcome {
    Inserted,
    Duplicate,
    Dropped,
}

/// Pulls, scores, enriches, and dedups candidate contacts
pub struct DiscoveryEngine {
    store: Arc<ContactStore>,
    directory: Arc<dyn DirectoryProvider>,
    cfg: DiscoveryConfig,
}

impl DiscoveryEngine {
    pub fn new(
        store: Arc<ContactStore>,
        directory: Arc<dyn DirectoryProvider>,
        cfg: DiscoveryConfig,
    ) -> Self {
        Self {
            store,
            directory,
            cfg,
        }
    }

    /// One discovery pass: consume up to `queries_per_run` matrix
    /// positions from the persisted cursor.
    #[instrument(skip(self))]
    pub async fn run_pass(&self) -> Result<DiscoverySummary> {
        let mut summary = DiscoverySummary::default();

        let matrix_len = self.cfg.niches.len() * self.cfg.geographies.len();
        if matrix_len == 0 {
            warn!("Discovery matrix is empty; configure niches and geographies");
            return Ok(summary);
        }

        let mut cursor = self.store.discovery_cursor()? as usize;

        for _ in 0..self.cfg.queries_per_run {
            let pos = cursor % matrix_len;
            let (niche, geography) = matrix_pair(&self.cfg.niches, &self.cfg.geographies, pos);

            summary.queries += 1;
            match self.run_query(niche, geography, &mut summary).await {
                Ok(()) => {}
                Err(e) => {
                    // Isolated per query; the cursor advances regardless
                    warn!(niche, geography, error = %e, "Discovery query failed");
                    summary.failures += 1;
                }
            }

            cursor = (pos + 1) % matrix_len;
            self.store.set_discovery_cursor(cursor as u64)?;
        }

        info!(
            queries = summary.queries,
            listings = summary.listings,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            dropped = summary.dropped,
            failures = summary.failures,
            "Discovery pass complete"
        );
        Ok(summary)
    }

    /// Page through one (niche, geography) query
    async fn run_query(
        &self,
        niche: &str,
        geography: &str,
        summary: &mut DiscoverySummary,
    ) -> Result<()> {
        let mut page_token: Option<String> = None;

        for _ in 0..self.cfg.max_pages_per_query {
            let page = self
                .directory
                .search(niche, geography, page_token.as_deref())
                .await?;

            summary.listings += page.results.len();

            for listing in &page.results {
                match self.process_candidate(listing, niche, geography) {
                    Ok(CandidateOutcome::Inserted) => summary.inserted += 1,
                    Ok(CandidateOutcome::Duplicate) => summary.duplicates += 1,
                    Ok(CandidateOutcome::Dropped) => summary.dropped += 1,
                    Err(e) => {
                        warn!(name = %listing.name, error = %e, "Failed to process candidate");
                    }
                }
            }

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(())
    }

    /// Score, enrich, dedup, and maybe insert one listing
    fn process_candidate(
        &self,
        listing: &DirectoryResult,
        niche: &str,
        geography: &str,
    ) -> Result<CandidateOutcome, StoreError> {
        let normalized = normalize_name(&listing.name);

        // Best-effort enrichment: derive an email guess from the domain
        // when no phone is listed.
        let email = match (&listing.phone, &listing.website) {
            (None, Some(website)) => guess_email(website),
            _ => None,
        };

        if listing.phone.is_none() && email.is_none() {
            debug!(name = %listing.name, "Candidate dropped: no contact path");
            return Ok(CandidateOutcome::Dropped);
        }

        if let Some(existing) = self.store.find_duplicate(
            listing.phone.as_deref(),
            &normalized,
            email.as_deref(),
        )? {
            debug!(name = %listing.name, existing = %existing, "Candidate excluded by dedup");
            return Ok(CandidateOutcome::Duplicate);
        }

        let contact = Contact {
            id: Uuid::new_v4(),
            business_name: listing.name.clone(),
            normalized_name: normalized,
            phone: listing.phone.clone(),
            email,
            website: listing.website.clone(),
            source: self.cfg.source_tag.clone(),
            niche: niche.to_string(),
            geography: geography.to_string(),
            status: ContactStatus::New,
            engagement_score: lead_score(listing),
            strategy_hint: None,
            ghost_count: 0,
            consent_logged: true,
            next_touch_at: None,
            last_contacted_at: None,
            created_at: Utc::now(),
            version: 0,
        };

        self.store.insert_contact(&contact)?;
        debug!(contact_id = %contact.id, name = %contact.business_name, score = contact.engagement_score, "Contact inserted");
        Ok(CandidateOutcome::Inserted)
    }
}

/// Map a flat matrix position to its (niche, geography) pair.
/// Geography is the fast axis.
pub fn matrix_pair<'a>(niches: &'a [String], geographies: &'a [String], pos: usize) -> (&'a str, &'a str) {
    let niche = &niches[pos / geographies.len()];
    let geography = &geographies[pos % geographies.len()];
    (niche, geography)
}

/// Lightweight lead-quality score from directory signals:
/// rating (0–5), review volume, and presence of contact info.
pub fn lead_score(listing: &DirectoryResult) -> i64 {
    let mut score = listing
        .rating
        .map(|r| r.clamp(0.0, 5.0).round() as i64)
        .unwrap_or(0);

    match listing.review_count.unwrap_or(0) {
        n if n >= 50 => score += 2,
        n if n >= 10 => score += 1,
        _ => {}
    }

    if listing.phone.is_some() {
        score += 2;
    }
    if listing.website.is_some() {
        score += 1;
    }

    score
}

/// Domain-based email guess from a website URL.
pub fn guess_email(website: &str) -> Option<String> {
    let trimmed = website.trim();
    let after_scheme = match trimmed.find("://") {
        Some(idx) => &trimmed[idx + 3..],
        None => trimmed,
    };

    let host = after_scheme
        .split('/')
        .next()
        .unwrap_or("")
        .trim_start_matches("www.")
        .to_lowercase();

    if host.is_empty() || !host.contains('.') {
        return None;
    }

    Some(format!("info@{}", host))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(
        name: &str,
        phone: Option<&str>,
        website: Option<&str>,
        rating: Option<f64>,
        reviews: Option<i64>,
    ) -> DirectoryResult {
        DirectoryResult {
            name: name.to_string(),
            phone: phone.map(String::from),
            website: website.map(String::from),
            address: None,
            rating,
            review_count: reviews,
        }
    }

    #[test]
    fn test_lead_score_components() {
        // Full marks: rating 5 + reviews 2 + phone 2 + website 1
        let full = listing("A", Some("+1555"), Some("https://a.test"), Some(4.6), Some(80));
        assert_eq!(lead_score(&full), 10);

        // Rating 4 + mid reviews 1 + phone 2 = 7
        let mid = listing("B", Some("+1555"), None, Some(4.2), Some(30));
        assert_eq!(lead_score(&mid), 7);

        // Nothing listed
        let bare = listing("C", None, None, None, None);
        assert_eq!(lead_score(&bare), 0);
    }

    #[test]
    fn test_guess_email() {
        assert_eq!(
            guess_email("https://www.acme-plumbing.com/contact"),
            Some("info@acme-plumbing.com".to_string())
        );
        assert_eq!(
            guess_email("http://Example.COM"),
            Some("info@example.com".to_string())
        );
        assert_eq!(
            guess_email("acme.io"),
            Some("info@acme.io".to_string())
        );
        assert_eq!(guess_email("localhost"), None);
        assert_eq!(guess_email(""), None);
    }

    #[test]
    fn test_matrix_pair_layout() {
        let niches = vec!["plumber".to_string(), "roofer".to_string()];
        let geographies = vec!["austin".to_string(), "dallas".to_string(), "houston".to_string()];

        assert_eq!(matrix_pair(&niches, &geographies, 0), ("plumber", "austin"));
        assert_eq!(matrix_pair(&niches, &geographies, 1), ("plumber", "dallas"));
        assert_eq!(matrix_pair(&niches, &geographies, 2), ("plumber", "houston"));
        assert_eq!(matrix_pair(&niches, &geographies, 3), ("roofer", "austin"));
        assert_eq!(matrix_pair(&niches, &geographies, 5), ("roofer", "houston"));
    }
}
