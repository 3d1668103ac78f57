//! Optimistic-update reconciliation.
//!
//! While a form submission is in flight the client renders the confirmed
//! rows from the last load with every pending submission folded in. The
//! submissions are parsed with the same `IntentForm` impl the route action
//! uses, so a pending row looks exactly like the one the server will
//! return. Once the server confirms, the entity id is already present and
//! folding the submission again changes nothing.

use indexmap::IndexMap;

use super::forms::{FormData, IntentForm};
use super::models::PublicUser;

/// Who is looking at the list, and when.
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    pub viewer: PublicUser,
    /// Timestamp stamped on optimistically created rows.
    pub now: String,
}

impl ReconcileContext {
    pub fn new(viewer: PublicUser) -> Self {
        Self {
            viewer,
            now: chrono::Utc::now()
                .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                .to_string(),
        }
    }
}

/// An intent that can be applied to a list of rows before the server has
/// confirmed it.
pub trait Optimistic: IntentForm {
    type Row: Clone;

    fn key(row: &Self::Row) -> &str;

    /// Apply this intent. Inserting a key that already exists keeps its
    /// position; new keys go to the end.
    fn apply(self, rows: &mut IndexMap<String, Self::Row>, ctx: &ReconcileContext);
}

/// Fold `pending` submissions, in order, into the `confirmed` rows.
/// Submissions that do not parse as `I` are skipped.
pub fn reconcile<I: Optimistic>(
    confirmed: Vec<I::Row>,
    pending: &[FormData],
    ctx: &ReconcileContext,
) -> Vec<I::Row> {
    let mut rows: IndexMap<String, I::Row> = confirmed
        .into_iter()
        .map(|row| (I::key(&row).to_string(), row))
        .collect();

    for form in pending {
        if let Ok(intent) = I::parse(form) {
            intent.apply(&mut rows, ctx);
        }
    }

    rows.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::forms::{FieldErrors, Fields, unknown_intent};

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: String,
        text: String,
        author: String,
    }

    enum NoteIntent {
        Create { id: Option<String>, text: String },
        Rename { id: String, text: Option<String> },
        Delete { id: String },
    }

    impl IntentForm for NoteIntent {
        fn parse(form: &FormData) -> Result<Self, FieldErrors> {
            let mut f = Fields::new(form);
            match form.get("intent") {
                Some("create") => {
                    let intent = NoteIntent::Create {
                        id: f.optional("id"),
                        text: f.required("text"),
                    };
                    f.finish(intent)
                }
                Some("rename") => {
                    let intent = NoteIntent::Rename {
                        id: f.required("id"),
                        text: f.optional("text"),
                    };
                    f.finish(intent)
                }
                Some("delete") => {
                    let intent = NoteIntent::Delete { id: f.required("id") };
                    f.finish(intent)
                }
                _ => Err(unknown_intent(form)),
            }
        }
    }

    impl Optimistic for NoteIntent {
        type Row = Note;

        fn key(row: &Note) -> &str {
            &row.id
        }

        fn apply(self, rows: &mut IndexMap<String, Note>, ctx: &ReconcileContext) {
            match self {
                NoteIntent::Create { id: Some(id), text } => {
                    rows.insert(
                        id.clone(),
                        Note {
                            id,
                            text,
                            author: ctx.viewer.full_name(),
                        },
                    );
                }
                NoteIntent::Create { id: None, .. } => {}
                NoteIntent::Rename { id, text } => {
                    if let (Some(row), Some(text)) = (rows.get_mut(&id), text) {
                        row.text = text;
                    }
                }
                NoteIntent::Delete { id } => {
                    rows.shift_remove(&id);
                }
            }
        }
    }

    fn ctx() -> ReconcileContext {
        ReconcileContext {
            viewer: PublicUser {
                id: "u1".into(),
                user_name: "ada".into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
            },
            now: "2024-01-01T00:00:00.000Z".into(),
        }
    }

    fn note(id: &str, text: &str) -> Note {
        Note {
            id: id.into(),
            text: text.into(),
            author: "Server".into(),
        }
    }

    fn form(pairs: &[(&str, &str)]) -> FormData {
        FormData::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_no_pending_returns_confirmed() {
        let rows = vec![note("a", "one"), note("b", "two")];
        let out = reconcile::<NoteIntent>(rows.clone(), &[], &ctx());
        assert_eq!(out, rows);
    }

    #[test]
    fn test_create_appends_with_viewer() {
        let out = reconcile::<NoteIntent>(
            vec![note("a", "one")],
            &[form(&[("intent", "create"), ("id", "n"), ("text", "new")])],
            &ctx(),
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].id, "n");
        assert_eq!(out[1].author, "Ada Lovelace");
    }

    #[test]
    fn test_create_without_id_is_not_shown() {
        let out = reconcile::<NoteIntent>(
            vec![],
            &[form(&[("intent", "create"), ("text", "new")])],
            &ctx(),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_confirmed_create_is_not_duplicated() {
        let pending = [form(&[("intent", "create"), ("id", "n"), ("text", "new")])];
        let confirmed = vec![note("a", "one"), note("n", "new")];
        let out = reconcile::<NoteIntent>(confirmed, &pending, &ctx());
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].id, "n");
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let pending = [
            form(&[("intent", "create"), ("id", "n"), ("text", "new")]),
            form(&[("intent", "rename"), ("id", "a"), ("text", "renamed")]),
            form(&[("intent", "delete"), ("id", "b")]),
        ];
        let once = reconcile::<NoteIntent>(
            vec![note("a", "one"), note("b", "two")],
            &pending,
            &ctx(),
        );
        let twice = reconcile::<NoteIntent>(once.clone(), &pending, &ctx());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
        assert_eq!(once[0].text, "renamed");
    }

    #[test]
    fn test_delete_keeps_order_of_remaining_rows() {
        let out = reconcile::<NoteIntent>(
            vec![note("a", "1"), note("b", "2"), note("c", "3")],
            &[form(&[("intent", "delete"), ("id", "b")])],
            &ctx(),
        );
        let ids: Vec<_> = out.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_unparsable_submissions_are_skipped() {
        let out = reconcile::<NoteIntent>(
            vec![note("a", "1")],
            &[
                form(&[("intent", "explode")]),
                form(&[("intent", "delete")]),
            ],
            &ctx(),
        );
        assert_eq!(out, vec![note("a", "1")]);
    }
}
