//! SQLite-backed contact store.
//!
//! Holds the four persisted surfaces of the engine: contacts, the
//! append-only touch log, the pipeline-state key/value singletons, and
//! heartbeat records. Status updates are conditional on the contact's
//! `version` column so concurrent ticks cannot silently double-dispatch;
//! a lost race surfaces as `StoreError::VersionConflict` and the caller
//! skips the contact.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    Channel, Contact, ContactStatus, HeartbeatRecord, PipelineMode, Touch, TouchOutcome,
};

mod schema;

pub use schema::SCHEMA;

/// Errors surfaced by the contact store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Contact not found: {0}")]
    NotFound(Uuid),

    #[error("Version conflict on contact {id}: concurrent update won the race")]
    VersionConflict { id: Uuid },

    #[error("Invalid status transition for contact {id}: {from} → {to}")]
    InvalidTransition {
        id: Uuid,
        from: ContactStatus,
        to: ContactStatus,
    },

    #[error("Store lock poisoned")]
    Lock,

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// SQLite-backed store shared by every engine component
pub struct ContactStore {
    conn: Mutex<Connection>,
}

impl ContactStore {
    /// Open (or create) the store at the given path
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some(e.to_string()),
                )
            })?;
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (test fixtures)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Lock)
    }

    // ------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------

    /// Insert a new contact row
    pub fn insert_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO contacts (id, business_name, normalized_name, phone, email, website,
                                   source, niche, geography, status, engagement_score,
                                   strategy_hint, ghost_count, consent_logged, next_touch_at,
                                   last_contacted_at, created_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                contact.id.to_string(),
                contact.business_name,
                contact.normalized_name,
                contact.phone,
                contact.email,
                contact.website,
                contact.source,
                contact.niche,
                contact.geography,
                contact.status.to_string(),
                contact.engagement_score,
                contact.strategy_hint,
                contact.ghost_count,
                contact.consent_logged as i64,
                contact.next_touch_at.map(|t| t.to_rfc3339()),
                contact.last_contacted_at.map(|t| t.to_rfc3339()),
                contact.created_at.to_rfc3339(),
                contact.version,
            ],
        )?;
        Ok(())
    }

    /// Fetch a contact by id
    pub fn get_contact(&self, id: Uuid) -> Result<Contact, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM contacts WHERE id = ?1")?;
        stmt.query_row(params![id.to_string()], row_to_contact)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id),
                other => StoreError::Sqlite(other),
            })
    }

    /// Contacts in a single status, oldest first
    pub fn contacts_with_status(
        &self,
        status: ContactStatus,
        limit: usize,
    ) -> Result<Vec<Contact>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM contacts WHERE status = ?1 ORDER BY created_at ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![status.to_string(), limit as i64], row_to_contact)?;
        collect_contacts(rows)
    }

    /// Dispatch-eligible batch: research done, retry delay elapsed,
    /// highest engagement first.
    pub fn dispatchable_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Contact>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM contacts
             WHERE status = 'research_done'
               AND (next_touch_at IS NULL OR next_touch_at <= ?1)
             ORDER BY engagement_score DESC, created_at ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![now.to_rfc3339(), limit as i64], row_to_contact)?;
        collect_contacts(rows)
    }

    /// Contacts in the drip sequence (sent or already nurturing),
    /// oldest contact first.
    pub fn nurture_candidates(&self, limit: usize) -> Result<Vec<Contact>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM contacts
             WHERE status = 'outreach_sent' OR status LIKE 'nurture_day_%'
             ORDER BY last_contacted_at ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_contact)?;
        collect_contacts(rows)
    }

    /// Contacts eligible for a voice follow-up: message already accepted,
    /// phone on file, last touch at or before the cutoff.
    pub fn voice_candidates(
        &self,
        limit: usize,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Contact>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM contacts
             WHERE status = 'outreach_sent'
               AND phone IS NOT NULL
               AND last_contacted_at IS NOT NULL
               AND last_contacted_at <= ?1
             ORDER BY engagement_score DESC, last_contacted_at ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![cutoff.to_rfc3339(), limit as i64], row_to_contact)?;
        collect_contacts(rows)
    }

    /// Contacts stuck in an awaiting-reply state with no touch since the
    /// cutoff; input to the self-healing requeue.
    pub fn ghost_candidates(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Contact>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM contacts
             WHERE (status IN ('outreach_dispatched', 'outreach_sent', 'calling_initiated')
                    OR status LIKE 'nurture_day_%')
               AND last_contacted_at IS NOT NULL
               AND last_contacted_at <= ?1
             ORDER BY last_contacted_at ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![cutoff.to_rfc3339(), limit as i64], row_to_contact)?;
        collect_contacts(rows)
    }

    /// Update a contact's status along a forward edge of the state graph.
    ///
    /// Conditional on the version the caller read; a concurrent update in
    /// another tick surfaces as `VersionConflict`.
    pub fn update_status(
        &self,
        contact: &Contact,
        next: ContactStatus,
    ) -> Result<(), StoreError> {
        self.transition(contact, next, None)
    }

    /// Status update that also stamps `last_contacted_at` (dispatch paths)
    pub fn mark_contacted(
        &self,
        contact: &Contact,
        next: ContactStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.transition(contact, next, Some(at))
    }

    fn transition(
        &self,
        contact: &Contact,
        next: ContactStatus,
        contacted_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        if !contact.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id: contact.id,
                from: contact.status,
                to: next,
            });
        }

        // A contact with no contact path may only move between skip states;
        // it must never re-enter the dispatchable funnel.
        if !contact.has_contact_path()
            && !matches!(
                next,
                ContactStatus::NoContactInfo | ContactStatus::SkippedNoUrl | ContactStatus::BadData
            )
        {
            return Err(StoreError::InvalidTransition {
                id: contact.id,
                from: contact.status,
                to: next,
            });
        }

        let conn = self.conn()?;
        let changed = match contacted_at {
            Some(at) => conn.execute(
                "UPDATE contacts
                 SET status = ?1, last_contacted_at = ?2, next_touch_at = NULL,
                     version = version + 1
                 WHERE id = ?3 AND version = ?4",
                params![
                    next.to_string(),
                    at.to_rfc3339(),
                    contact.id.to_string(),
                    contact.version
                ],
            )?,
            None => conn.execute(
                "UPDATE contacts SET status = ?1, version = version + 1
                 WHERE id = ?2 AND version = ?3",
                params![next.to_string(), contact.id.to_string(), contact.version],
            )?,
        };

        if changed == 0 {
            return Err(StoreError::VersionConflict { id: contact.id });
        }

        debug!(contact_id = %contact.id, from = %contact.status, to = %next, "Status updated");
        Ok(())
    }

    /// Attach (or refresh) the externally produced strategy hint
    pub fn set_strategy_hint(&self, id: Uuid, hint: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE contacts SET strategy_hint = ?1 WHERE id = ?2",
            params![hint, id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// The requeue backward edge: cycle an unresponsive contact back to
    /// the dispatchable pool, bumping its ghost count.
    ///
    /// Refuses contacts that are not in an awaiting-reply state.
    pub fn requeue_ghost(
        &self,
        contact: &Contact,
        next_touch_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if !contact.status.is_awaiting_reply() {
            return Err(StoreError::InvalidTransition {
                id: contact.id,
                from: contact.status,
                to: ContactStatus::ResearchDone,
            });
        }

        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE contacts
             SET status = 'research_done', ghost_count = ghost_count + 1,
                 next_touch_at = ?1, version = version + 1
             WHERE id = ?2 AND version = ?3",
            params![
                next_touch_at.to_rfc3339(),
                contact.id.to_string(),
                contact.version
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::VersionConflict { id: contact.id });
        }
        Ok(())
    }

    /// Terminal edge out of the requeue loop: ghost ceiling exhausted.
    pub fn trash_ghost(&self, contact: &Contact) -> Result<(), StoreError> {
        if !contact.status.is_awaiting_reply() {
            return Err(StoreError::InvalidTransition {
                id: contact.id,
                from: contact.status,
                to: ContactStatus::Trashed,
            });
        }

        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE contacts SET status = 'trashed', version = version + 1
             WHERE id = ?1 AND version = ?2",
            params![contact.id.to_string(), contact.version],
        )?;

        if changed == 0 {
            return Err(StoreError::VersionConflict { id: contact.id });
        }
        Ok(())
    }

    /// Dedup probe: does any existing contact match on phone, normalized
    /// name, or email? First match wins.
    pub fn find_duplicate(
        &self,
        phone: Option<&str>,
        normalized_name: &str,
        email: Option<&str>,
    ) -> Result<Option<Uuid>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM contacts
             WHERE (?1 IS NOT NULL AND phone = ?1)
                OR normalized_name = ?2
                OR (?3 IS NOT NULL AND email = ?3)
             LIMIT 1",
        )?;

        let id: Option<String> = stmt
            .query_row(params![phone, normalized_name, email], |row| row.get(0))
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        Ok(id.and_then(|s| Uuid::parse_str(&s).ok()))
    }

    /// Per-status row counts for the operator status view
    pub fn funnel_counts(&self) -> Result<Vec<(String, i64)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM contacts GROUP BY status ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    // ------------------------------------------------------------------
    // Touches
    // ------------------------------------------------------------------

    /// Append one touch to the audit log. Touches are never updated.
    pub fn append_touch(&self, touch: &Touch) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO touches (id, contact_id, channel, outcome, provider_response, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                touch.id.to_string(),
                touch.contact_id.to_string(),
                touch.channel.to_string(),
                touch.outcome.to_string(),
                serde_json::to_string(&touch.provider_response)?,
                touch.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recent touches, newest first, excluding the passive
    /// call-status channel. The breaker's sampling window.
    pub fn recent_touches(&self, limit: usize) -> Result<Vec<Touch>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM touches
             WHERE channel != 'call_status'
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_touch)?;

        let mut touches = Vec::new();
        for row in rows {
            touches.push(row?);
        }
        Ok(touches)
    }

    /// Total non-passive touches ever recorded; the breaker's
    /// insufficient-sample guard reads this explicitly.
    pub fn touch_count(&self) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM touches WHERE channel != 'call_status'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// All touches for one contact, oldest first
    pub fn touches_for_contact(&self, contact_id: Uuid) -> Result<Vec<Touch>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM touches WHERE contact_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![contact_id.to_string()], row_to_touch)?;

        let mut touches = Vec::new();
        for row in rows {
            touches.push(row?);
        }
        Ok(touches)
    }

    /// Timestamp of the first dispatch attempt against a contact;
    /// anchors the nurture drip schedule.
    pub fn first_touch_at(&self, contact_id: Uuid) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.conn()?;
        let ts: Option<String> = conn
            .query_row(
                "SELECT MIN(created_at) FROM touches WHERE contact_id = ?1",
                params![contact_id.to_string()],
                |row| row.get(0),
            )
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        Ok(ts.as_deref().and_then(parse_ts_opt))
    }

    /// Voice touches recorded on a given calendar day; enforces the
    /// voice channel's daily cap.
    pub fn voice_touches_on(&self, day: NaiveDate) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM touches
             WHERE channel = 'voice' AND date(created_at) = ?1",
            params![day.format("%Y-%m-%d").to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Pipeline state
    // ------------------------------------------------------------------

    /// Current pipeline mode; a missing row means `Working`.
    pub fn mode(&self) -> Result<PipelineMode, StoreError> {
        match self.get_state("mode")? {
            Some(raw) => Ok(raw.parse().unwrap_or(PipelineMode::Working)),
            None => Ok(PipelineMode::Working),
        }
    }

    /// Set the pipeline mode, optionally recording why
    pub fn set_mode(&self, mode: PipelineMode, reason: Option<&str>) -> Result<(), StoreError> {
        self.set_state("mode", &mode.to_string())?;
        if let Some(reason) = reason {
            self.set_state("halted_reason", reason)?;
        }
        Ok(())
    }

    /// Current discovery cursor; a missing row means 0.
    pub fn discovery_cursor(&self) -> Result<u64, StoreError> {
        Ok(self
            .get_state("discovery_cursor")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    pub fn set_discovery_cursor(&self, cursor: u64) -> Result<(), StoreError> {
        self.set_state("discovery_cursor", &cursor.to_string())
    }

    /// Read a pipeline-state value
    pub fn get_state(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM pipeline_state WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StoreError::Sqlite(other)),
        })
    }

    /// Write a pipeline-state value (last writer wins)
    pub fn set_state(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pipeline_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Heartbeats
    // ------------------------------------------------------------------

    /// Append a heartbeat record
    pub fn append_heartbeat(&self, hb: &HeartbeatRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO heartbeats (id, tick_index, mode, note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                hb.id.to_string(),
                hb.tick_index as i64,
                hb.mode.to_string(),
                hb.note,
                hb.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Number of heartbeats recorded (operator status view)
    pub fn heartbeat_count(&self) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM heartbeats", [], |row| row.get(0))?;
        Ok(count)
    }
}

// ----------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------

fn collect_contacts(
    rows: impl Iterator<Item = rusqlite::Result<Contact>>,
) -> Result<Vec<Contact>, StoreError> {
    let mut contacts = Vec::new();
    for row in rows {
        contacts.push(row?);
    }
    Ok(contacts)
}

fn row_to_contact(row: &Row<'_>) -> rusqlite::Result<Contact> {
    let id: String = row.get("id")?;
    let status: String = row.get("status")?;
    let next_touch_at: Option<String> = row.get("next_touch_at")?;
    let last_contacted_at: Option<String> = row.get("last_contacted_at")?;
    let created_at: String = row.get("created_at")?;

    Ok(Contact {
        id: parse_uuid(&id, 0)?,
        business_name: row.get("business_name")?,
        normalized_name: row.get("normalized_name")?,
        phone: row.get("phone")?,
        email: row.get("email")?,
        website: row.get("website")?,
        source: row.get("source")?,
        niche: row.get("niche")?,
        geography: row.get("geography")?,
        status: status
            .parse()
            .map_err(|e| conversion_err(9, Box::new(e)))?,
        engagement_score: row.get("engagement_score")?,
        strategy_hint: row.get("strategy_hint")?,
        ghost_count: row.get("ghost_count")?,
        consent_logged: row.get::<_, i64>("consent_logged")? != 0,
        next_touch_at: next_touch_at.as_deref().and_then(parse_ts_opt),
        last_contacted_at: last_contacted_at.as_deref().and_then(parse_ts_opt),
        created_at: parse_ts(&created_at, 16)?,
        version: row.get("version")?,
    })
}

fn row_to_touch(row: &Row<'_>) -> rusqlite::Result<Touch> {
    let id: String = row.get("id")?;
    let contact_id: String = row.get("contact_id")?;
    let channel: String = row.get("channel")?;
    let outcome: String = row.get("outcome")?;
    let response: String = row.get("provider_response")?;
    let created_at: String = row.get("created_at")?;

    Ok(Touch {
        id: parse_uuid(&id, 0)?,
        contact_id: parse_uuid(&contact_id, 1)?,
        channel: channel
            .parse::<Channel>()
            .map_err(|e| conversion_err(2, Box::new(e)))?,
        outcome: outcome
            .parse::<TouchOutcome>()
            .map_err(|e| conversion_err(3, Box::new(e)))?,
        provider_response: serde_json::from_str(&response)
            .unwrap_or(serde_json::Value::Null),
        created_at: parse_ts(&created_at, 5)?,
    })
}

fn parse_uuid(raw: &str, idx: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| conversion_err(idx, Box::new(e)))
}

fn parse_ts(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, Box::new(e)))
}

fn parse_ts_opt(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

fn conversion_err(
    idx: usize,
    err: Box<dyn std::error::Error + Send + Sync>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err)
}
