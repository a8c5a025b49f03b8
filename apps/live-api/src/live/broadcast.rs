//! Fan-out of record changes to every session listening to the record.

use std::sync::Arc;

use serde_json::Value;

use super::index::DataListenerIndex;
use super::registry::SessionRegistry;
use super::session::scalar_id;

/// New representation of a changed record.
#[derive(Debug, Clone, PartialEq)]
pub enum DataPayload {
    /// A plain record.
    Record(Value),
    /// A document wrapper around one or more records; only the first one is
    /// sent.
    Document(Vec<Value>),
}

impl DataPayload {
    pub fn into_record(self) -> Option<Value> {
        match self {
            DataPayload::Record(record) => Some(record),
            DataPayload::Document(records) => records.into_iter().next(),
        }
    }
}

impl From<Value> for DataPayload {
    fn from(record: Value) -> Self {
        DataPayload::Record(record)
    }
}

/// Entry point for "record `id` changed".
#[derive(Clone)]
pub struct Broadcaster {
    sessions: Arc<SessionRegistry>,
    index: Arc<DataListenerIndex>,
}

impl Broadcaster {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        let index = sessions.index().clone();
        Self { sessions, index }
    }

    /// Push `data` to every session listening to `id`. Returns how many
    /// sessions were notified.
    pub fn update_data(&self, id: &str, data: impl Into<DataPayload>) -> usize {
        let subscribers = self.index.subscribers(id);
        if subscribers.is_empty() {
            return 0;
        }

        let Some(record) = data.into().into_record() else {
            tracing::debug!(data_id = %id, "empty document, nothing to send");
            return 0;
        };
        let record = select_record(id, record);

        let mut notified = 0;
        for session_id in subscribers {
            match self.sessions.get(&session_id) {
                Some(session) => {
                    session.send_data_update(id, record.clone(), None);
                    notified += 1;
                }
                None => tracing::warn!(
                    data_id = %id,
                    session_id = %session_id,
                    "index lists a session that is no longer registered"
                ),
            }
        }

        tracing::debug!(data_id = %id, sessions = notified, "data update dispatched");
        notified
    }
}

/// Pick the object that actually carries `id`.
///
/// A change is sometimes reported with the parent record that contains the
/// changed sub-record. If the record's own `_id`/`id` is not `id`, the first
/// field (or element) one level down whose identifier is `id` is used
/// instead. Falls back to the record itself.
pub fn select_record(id: &str, record: Value) -> Value {
    if !looks_like_identifier(id) || record_id(&record).as_deref() == Some(id) {
        return record;
    }

    let nested = match &record {
        Value::Object(fields) => fields
            .values()
            .find(|value| record_id(value).as_deref() == Some(id)),
        Value::Array(items) => items
            .iter()
            .find(|value| record_id(value).as_deref() == Some(id)),
        _ => None,
    };

    match nested {
        Some(found) => found.clone(),
        None => record,
    }
}

/// Opaque identifiers: ObjectIds, ULIDs, UUIDs and similar single tokens.
fn looks_like_identifier(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// `_id`, falling back to `id`, of an object value.
fn record_id(value: &Value) -> Option<String> {
    let fields = value.as_object()?;
    fields
        .get("_id")
        .and_then(scalar_id)
        .or_else(|| fields.get("id").and_then(scalar_id))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::Config;
    use crate::live::client::ClientInfo;
    use crate::live::connection::testing::RecordingConnection;
    use crate::live::connection::DataUpdate;

    fn broadcaster() -> (Arc<SessionRegistry>, Broadcaster) {
        let registry =
            SessionRegistry::new(&Config::default(), Arc::new(DataListenerIndex::new()), None);
        let broadcaster = Broadcaster::new(registry.clone());
        (registry, broadcaster)
    }

    #[test]
    fn nested_record_is_selected() {
        let data = json!({"_id": "other", "child": {"_id": "id123", "v": 5}});
        assert_eq!(select_record("id123", data), json!({"_id": "id123", "v": 5}));
    }

    #[test]
    fn matching_top_level_record_is_kept() {
        let data = json!({"_id": "id123", "child": {"_id": "id123", "v": 5}});
        assert_eq!(select_record("id123", data.clone()), data);

        let data = json!({"id": 42, "name": "n"});
        assert_eq!(select_record("42", data.clone()), data);
    }

    #[test]
    fn first_nested_match_wins() {
        let data = json!({
            "_id": "parent",
            "first": {"id": "c1", "n": 1},
            "second": {"_id": "c1", "n": 2}
        });
        assert_eq!(select_record("c1", data), json!({"id": "c1", "n": 1}));
    }

    #[test]
    fn object_id_wrappers_and_arrays() {
        let oid = "5f43a1b2c3d4e5f6a7b8c9d0";
        let data = json!([{"_id": {"$oid": "aaaaaaaaaaaaaaaaaaaaaaaa"}}, {"_id": {"$oid": oid}, "x": 1}]);
        assert_eq!(select_record(oid, data), json!({"_id": {"$oid": oid}, "x": 1}));
    }

    #[test]
    fn no_match_or_non_identifier_keeps_record() {
        let data = json!({"_id": "other", "child": {"_id": "zzz"}});
        assert_eq!(select_record("id123", data.clone()), data);

        let data = json!({"_id": "other", "child": {"_id": "a b"}});
        assert_eq!(select_record("a b", data.clone()), data);
    }

    #[test]
    fn no_subscribers_is_a_noop() {
        let (_registry, broadcaster) = broadcaster();
        assert_eq!(broadcaster.update_data("nobody", json!({"v": 1})), 0);
    }

    #[tokio::test]
    async fn fans_out_to_all_subscribed_sessions() {
        let (registry, broadcaster) = broadcaster();

        let first = registry.create(ClientInfo::default());
        let second = registry.create(ClientInfo::default());
        let bystander = registry.create(ClientInfo::default());

        let c1 = RecordingConnection::new("s1");
        let c2 = RecordingConnection::new("s2");
        let c3 = RecordingConnection::new("s3");
        let _h1 = first.register_connection(c1.clone());
        let _h2 = second.register_connection(c2.clone());
        let _h3 = bystander.register_connection(c3.clone());

        first.register_bindings(["id123"], Some("s1"));
        second.register_bindings(["id123"], Some("s2"));
        bystander.register_bindings(["other"], Some("s3"));

        let notified = broadcaster.update_data(
            "id123",
            json!({"_id": "other", "child": {"_id": "id123", "v": 5}}),
        );

        assert_eq!(notified, 2);
        let expected = vec![DataUpdate::new("id123", json!({"v": 5, "_id": "id123"}))];
        assert_eq!(c1.updates(), expected);
        assert_eq!(c2.updates(), expected);
        assert!(c3.updates().is_empty());
    }

    #[tokio::test]
    async fn documents_are_unwrapped() {
        let (registry, broadcaster) = broadcaster();
        let session = registry.create(ClientInfo::default());
        let conn = RecordingConnection::new("s1");
        let _handle = session.register_connection(conn.clone());
        session.register_bindings(["r1"], Some("s1"));

        let document = DataPayload::Document(vec![
            json!({"_id": "r1", "title": "first"}),
            json!({"_id": "r2", "title": "second"}),
        ]);
        assert_eq!(broadcaster.update_data("r1", document), 1);
        assert_eq!(
            conn.updates(),
            vec![DataUpdate::new("r1", json!({"_id": "r1", "title": "first"}))]
        );

        assert_eq!(broadcaster.update_data("r1", DataPayload::Document(vec![])), 0);
        assert_eq!(conn.updates().len(), 1);
    }

    #[tokio::test]
    async fn removed_sessions_stop_receiving() {
        let (registry, broadcaster) = broadcaster();
        let session = registry.create(ClientInfo::default());
        let conn = RecordingConnection::new("s1");
        let _handle = session.register_connection(conn.clone());
        session.register_bindings(["r1"], Some("s1"));

        session.destroy();

        assert_eq!(broadcaster.update_data("r1", json!({"_id": "r1"})), 0);
        assert!(conn.updates().is_empty());
    }
}
