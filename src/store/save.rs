//! Persisting records: scheduling saves and applying adapter outcomes.

use crate::adapter::AdapterError;
use crate::error::{Result, StoreError};
use crate::model::ModelLookup;
use crate::runloop::Task;
use crate::serializer::{PrimaryData, RequestType, ResourceHash};
use crate::state::{RecordEvent, RecordState};
use crate::tickets::TicketValue;
use crate::types::{coerce_id, FetchTicket, ModelId};
use serde_json::Value;

use super::{PendingSave, Store};

impl Store {
    /// Commit a record's pending changes on the next flush. Saving a
    /// record that is already deleted and saved resolves immediately.
    pub fn save_record(&mut self, handle: ModelId) -> Result<FetchTicket> {
        if self.models.get(handle)?.current_state() == RecordState::DeletedSaved {
            return Ok(self.tickets.resolved(TicketValue::Record(Some(handle))));
        }
        self.models.live(handle)?;
        self.check_event(handle, &RecordEvent::WillCommit)?;

        self.models.live_mut(handle)?.flush_changed_attributes();
        let snapshot = self.snapshot(handle)?;
        self.send(handle, RecordEvent::WillCommit)?;

        let ticket = self.tickets.create();
        self.pending_saves.push(PendingSave {
            handle,
            snapshot,
            ticket,
        });
        self.run_loop.schedule_once(Task::FlushPendingSaves);
        Ok(ticket)
    }

    pub(crate) fn flush_pending_saves(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending_saves);
        for save in pending {
            self.commit(save)?;
        }
        Ok(())
    }

    fn commit(&mut self, save: PendingSave) -> Result<()> {
        let Ok(model) = self.models.live(save.handle) else {
            self.tickets.abandon(save.ticket);
            return Ok(());
        };
        let model_name = model.model_name().to_string();
        let request = if model.is_new() {
            RequestType::CreateRecord
        } else if model.is_deleted() {
            RequestType::DeleteRecord
        } else {
            RequestType::UpdateRecord
        };
        tracing::debug!(model = %model_name, record = save.handle.0, ?request, "committing");

        let result = self.registry.adapter_for(&model_name).and_then(|adapter| {
            let snapshot = &save.snapshot;
            let outcome = match request {
                RequestType::CreateRecord => adapter.create_record(&model_name, snapshot),
                RequestType::DeleteRecord => adapter.delete_record(&model_name, snapshot),
                _ => adapter.update_record(&model_name, snapshot),
            };
            outcome.map_err(StoreError::from)
        });

        match result {
            Ok(raw) => match self.commit_succeeded(&save, &model_name, request, raw) {
                Ok(()) => {
                    self.tickets
                        .resolve(save.ticket, TicketValue::Record(Some(save.handle)));
                    Ok(())
                }
                Err(error) => self.commit_failed(&save, error),
            },
            Err(StoreError::Adapter(AdapterError::Invalid(raw))) => {
                self.commit_invalid(&save, &model_name, raw)
            }
            Err(error) => self.commit_failed(&save, error),
        }
    }

    /// Apply the server's acknowledgement: returned data becomes canonical
    /// and in-flight edits are promoted.
    fn commit_succeeded(
        &mut self,
        save: &PendingSave,
        model_name: &str,
        request: RequestType,
        raw: Option<Value>,
    ) -> Result<()> {
        let handle = save.handle;
        self.join(|store| {
            let data = match raw {
                Some(raw) => store.extract_primary(model_name, raw, save.snapshot.id.as_deref(), request)?,
                None => None,
            };
            if let Some(id) = data.as_ref().and_then(|hash| hash.get("id")).and_then(coerce_id) {
                store.models.update_id(handle, &id)?;
            }
            let attributes = match &data {
                Some(hash) => Some(store.attributes_from_hash(model_name, hash)?),
                None => None,
            };
            let changed = store
                .models
                .live_mut(handle)?
                .adapter_did_commit(attributes.as_ref());
            if let Some(hash) = &data {
                if !store.models.get(handle)?.is_deleted() {
                    store.setup_relationships(handle, hash)?;
                }
            }
            store.send(handle, RecordEvent::DidCommit)?;
            store.record_did_change(handle);
            store.notify_properties(handle, changed);
            tracing::debug!(model = model_name, record = handle.0, "commit acknowledged");
            Ok(())
        })
    }

    /// Push sideloaded records and return the primary hash of a save
    /// response.
    fn extract_primary(
        &mut self,
        model_name: &str,
        raw: Value,
        id: Option<&str>,
        request: RequestType,
    ) -> Result<Option<ResourceHash>> {
        let payload = self
            .registry
            .serializer_for(model_name)
            .extract(model_name, raw, id, request)?;
        if let Some(meta) = &payload.meta {
            self.merge_metadata(model_name, meta);
        }
        for included in payload.included {
            self.push_hash(&included.model, included.hash)?;
        }
        Ok(match payload.primary {
            PrimaryData::One(hash) => Some(hash),
            PrimaryData::Many(hashes) => hashes.into_iter().next(),
            PrimaryData::None => None,
        })
    }

    fn commit_invalid(&mut self, save: &PendingSave, model_name: &str, raw: Value) -> Result<()> {
        let errors = self.registry.serializer_for(model_name).extract_errors(
            model_name,
            &raw,
            save.snapshot.id.as_deref(),
        );
        tracing::info!(model = model_name, record = save.handle.0, fields = errors.len(), "save rejected as invalid");
        let model = self.models.live_mut(save.handle)?;
        model.add_error_messages(&errors);
        model.save_was_rejected();
        self.send(save.handle, RecordEvent::BecameInvalid)?;
        self.record_did_change(save.handle);
        self.tickets.reject(save.ticket, StoreError::Invalid(errors));
        Ok(())
    }

    fn commit_failed(&mut self, save: &PendingSave, error: StoreError) -> Result<()> {
        tracing::warn!(record = save.handle.0, error = %error, "save failed");
        if self.models.is_live(save.handle) {
            if self.can_handle(save.handle, &RecordEvent::BecameError) {
                self.send(save.handle, RecordEvent::BecameError)?;
            }
            let model = self.models.live_mut(save.handle)?;
            model.did_error(error.to_string());
            model.save_was_rejected();
            self.record_did_change(save.handle);
        }
        self.tickets.reject(save.ticket, error);
        Ok(())
    }
}
