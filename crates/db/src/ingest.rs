use usage_core::{Event, SourceMetadata};

use crate::Db;
use crate::error::Result;
use crate::events::insert_events;
use crate::rollups::recalculate_affected;
use crate::sessions::recalculate_sessions;
use crate::sources::write_source;
use crate::types::AppliedBatch;

impl Db {
    /// Writes one source's events and refreshes every derived table they
    /// touch. The source metadata is written last, inside the same
    /// transaction, so a failed batch leaves the source looking unsynced.
    pub fn apply_source_batch(
        &mut self,
        events: &[Event],
        source: &SourceMetadata,
    ) -> Result<AppliedBatch> {
        let batch_size = self.rollup_batch_size;
        let tx = self.conn.transaction()?;
        let applied = insert_events(&tx, events)?;
        if !applied.affected_sessions.is_empty() {
            recalculate_sessions(&tx, &applied.affected_sessions)?;
            recalculate_affected(&tx, &applied.affected_sessions, batch_size)?;
        }
        write_source(&tx, source)?;
        tx.commit()?;
        Ok(applied)
    }

    /// Same as [`Db::apply_source_batch`] for events with no backing source.
    pub fn ingest_events(&mut self, events: &[Event]) -> Result<AppliedBatch> {
        let batch_size = self.rollup_batch_size;
        let tx = self.conn.transaction()?;
        let applied = insert_events(&tx, events)?;
        if !applied.affected_sessions.is_empty() {
            recalculate_sessions(&tx, &applied.affected_sessions)?;
            recalculate_affected(&tx, &applied.affected_sessions, batch_size)?;
        }
        tx.commit()?;
        Ok(applied)
    }
}
