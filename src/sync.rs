use crate::connection::ConnectionManager;
use crate::error::ClientError;
use crate::protocol::{decode_reply, Outbound, Query, ResultItem};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How replies that race each other are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyPolicy {
    /// Every well-formed reply replaces the results, so a slow reply to an
    /// older query can overwrite a newer one.
    #[default]
    LastMessageWins,
    /// Queries carry an increasing `seq`; replies echoing an older `seq`
    /// than the newest one sent are dropped.
    LatestSequence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncOptions {
    pub debounce: Duration,
    pub reply_policy: ReplyPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    items: Vec<ResultItem>,
}

impl ResultSet {
    pub fn items(&self) -> &[ResultItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Applied { count: usize },
    Stale { seq: u64, latest: u64 },
}

struct PendingQuery {
    query: Query,
    due: Instant,
}

pub struct QuerySynchronizer {
    options: SyncOptions,
    results: ResultSet,
    next_seq: u64,
    latest_sent_seq: Option<u64>,
    pending: Option<PendingQuery>,
}

impl QuerySynchronizer {
    pub fn new(options: SyncOptions) -> Self {
        Self {
            options,
            results: ResultSet::default(),
            next_seq: 1,
            latest_sent_seq: None,
            pending: None,
        }
    }

    pub fn options(&self) -> SyncOptions {
        self.options
    }

    pub fn results(&self) -> &ResultSet {
        &self.results
    }

    pub fn latest_sent_seq(&self) -> Option<u64> {
        self.latest_sent_seq
    }

    /// When the held query (if any) becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.due)
    }

    /// Called for every change of the input text. Sends immediately unless a
    /// debounce interval is configured, in which case the query is held until
    /// [`tick`](Self::tick) sees its deadline pass.
    pub fn on_input_changed(
        &mut self,
        conn: &mut ConnectionManager,
        text: &str,
    ) -> Result<(), ClientError> {
        let query = Query::new(text);
        if self.options.debounce.is_zero() {
            self.pending = None;
            return self.send_query(conn, &query);
        }
        self.pending = Some(PendingQuery {
            query,
            due: Instant::now() + self.options.debounce,
        });
        Ok(())
    }

    /// Flushes a held query whose deadline is at or before `now`. Returns
    /// whether a query went out. A failed send keeps the query held.
    pub fn tick(&mut self, conn: &mut ConnectionManager, now: Instant) -> Result<bool, ClientError> {
        let query = match &self.pending {
            Some(pending) if pending.due <= now => pending.query.clone(),
            _ => return Ok(false),
        };
        self.send_query(conn, &query)?;
        self.pending = None;
        Ok(true)
    }

    pub fn submit(&mut self, conn: &mut ConnectionManager, text: &str) -> Result<(), ClientError> {
        let payload = Outbound::submit(text).encode()?;
        conn.send(&payload)
    }

    /// Replaces the result set with the items of a well-formed reply. On any
    /// error the previous result set is kept.
    pub fn on_message_received(&mut self, payload: &str) -> Result<ReplyOutcome, ClientError> {
        let reply = match decode_reply(payload) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "ignoring malformed reply");
                return Err(err);
            }
        };

        if self.options.reply_policy == ReplyPolicy::LatestSequence {
            if let (Some(seq), Some(latest)) = (reply.seq, self.latest_sent_seq) {
                if seq < latest {
                    debug!(seq, latest, "dropping stale reply");
                    return Ok(ReplyOutcome::Stale { seq, latest });
                }
            }
        }

        self.results = ResultSet { items: reply.items };
        Ok(ReplyOutcome::Applied {
            count: self.results.len(),
        })
    }

    /// Same as [`on_message_received`](Self::on_message_received) for a frame
    /// that arrived as raw bytes. Bytes that are not UTF-8 are malformed.
    pub fn on_frame_received(&mut self, frame: &[u8]) -> Result<ReplyOutcome, ClientError> {
        match std::str::from_utf8(frame) {
            Ok(payload) => self.on_message_received(payload),
            Err(err) => {
                let err = ClientError::malformed(err.to_string(), &String::from_utf8_lossy(frame));
                warn!(error = %err, "ignoring malformed reply");
                Err(err)
            }
        }
    }

    fn send_query(&mut self, conn: &mut ConnectionManager, query: &Query) -> Result<(), ClientError> {
        let seq = match self.options.reply_policy {
            ReplyPolicy::LastMessageWins => None,
            ReplyPolicy::LatestSequence => Some(self.next_seq),
        };
        let payload = Outbound::query(query, seq).encode()?;
        conn.send(&payload)?;
        if let Some(seq) = seq {
            self.latest_sent_seq = Some(seq);
            self.next_seq = seq.saturating_add(1);
        }
        Ok(())
    }
}
