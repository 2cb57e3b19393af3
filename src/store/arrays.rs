//! Record arrays owned by the store.

use crate::error::{Result, StoreError};
use crate::record_arrays::{FilterFn, RecordArray, RecordArrayKind};
use crate::runloop::Task;
use crate::tickets::TicketValue;
use crate::types::{ArrayId, FetchTicket};
use serde_json::Value;

use super::Store;

impl Store {
    /// The live array of a type, without fetching.
    pub fn peek_all(&mut self, model_name: &str) -> Result<ArrayId> {
        self.schema.get(model_name)?;
        Ok(self
            .record_arrays
            .live_record_array_for(model_name, &self.models, &self.schema))
    }

    /// A live array of the loaded records of a type accepted by `filter`.
    pub fn filter(&mut self, model_name: &str, filter: FilterFn) -> Result<ArrayId> {
        self.schema.get(model_name)?;
        Ok(self
            .record_arrays
            .create_filtered(model_name, filter, &self.models, &self.schema))
    }

    /// Like [`Store::filter`], but also asks the adapter for records
    /// matching `query`. The ticket resolves with the filtered array once
    /// the query's records are in the store.
    pub fn filter_with_query(
        &mut self,
        model_name: &str,
        query: Value,
        filter: FilterFn,
    ) -> Result<(ArrayId, FetchTicket)> {
        let array = self.filter(model_name, filter)?;
        let fetched = self.query(model_name, query)?;
        let ticket = self
            .tickets
            .after_all(vec![fetched], TicketValue::RecordArray(array));
        Ok((array, ticket))
    }

    pub fn record_array(&self, array: ArrayId) -> Result<&RecordArray> {
        self.record_arrays.get(array)
    }

    /// Replace the predicate of a filtered array. Membership is rescanned
    /// on the next flush.
    pub fn set_filter_function(&mut self, array: ArrayId, filter: FilterFn) -> Result<()> {
        if *self.record_arrays.get(array)?.kind() == RecordArrayKind::Live {
            return Err(StoreError::InvalidOperation(
                "cannot filter the live record array of a type".into(),
            ));
        }
        self.record_arrays.set_filter(array, Some(filter))?;
        self.run_loop.schedule_once(Task::UpdateFilter(array));
        Ok(())
    }

    /// Refetch an array's content: a find-all for live and filtered arrays,
    /// the original query for adapter-populated ones.
    pub fn update_record_array(&mut self, array: ArrayId) -> Result<FetchTicket> {
        let record_array = self.record_arrays.get(array)?;
        let model_name = record_array.model_name().to_string();
        match record_array.kind().clone() {
            RecordArrayKind::Live => self.find_all_with(&model_name, true),
            RecordArrayKind::Filtered => {
                let fetched = self.find_all_with(&model_name, true)?;
                Ok(self
                    .tickets
                    .after_all(vec![fetched], TicketValue::RecordArray(array)))
            }
            RecordArrayKind::AdapterPopulated { query } => {
                self.queue_query(&model_name, array, query)
            }
        }
    }

    /// Stop maintaining an array. Pending queries for it are abandoned.
    pub fn unregister_record_array(&mut self, array: ArrayId) -> Result<()> {
        tracing::debug!(array = array.0, "unregistered record array");
        self.record_arrays.unregister(array)
    }
}
