use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::{require_admin, setup};
use crate::ipc::types::{AppState, Request};
use crate::photos::{self, ObjectStore, PhotoCategory};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormFields {
    pub student_name: String,
    pub date_of_birth: String,
    pub gender: String,
    pub school_name: String,
    pub grade: String,
    pub board: String,
    pub branch: String,
    pub academic_year: String,
    pub area: String,
    pub landmark: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
}

/// Transient blob handle: the UI saves the chosen file and passes its path.
/// These never reach the persistence layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoAttachment {
    pub path: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactDraft {
    pub phone: String,
    pub contact_name: String,
    pub relation: String,
    pub education_qualification: Option<String>,
    pub name_of_organisation: Option<String>,
    pub designation: Option<String>,
    pub department: Option<String>,
    pub photo: Option<PhotoAttachment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitParams {
    pub form: FormFields,
    #[serde(default)]
    pub student_photo: Option<PhotoAttachment>,
    pub contacts: Vec<ContactDraft>,
}

pub struct SubmissionOutcome {
    pub id: String,
    pub created_at: String,
    pub warnings: Vec<String>,
}

/// The documented blank draft the client applies after a successful
/// submission. Returned by the workflow so reset values live in one place.
pub fn default_draft() -> Value {
    json!({
        "form": {
            "studentName": "",
            "dateOfBirth": "",
            "gender": "",
            "schoolName": "",
            "grade": "Playschool",
            "board": "IGCSE",
            "branch": "",
            "academicYear": "2024-2025",
            "area": "",
            "landmark": "",
            "city": "",
            "state": "",
            "pincode": ""
        },
        "studentPhoto": null,
        "contacts": [
            { "phone": "", "contactName": "", "relation": "" }
        ]
    })
}

/// Required form fields mirror the public form's `required` attributes.
fn validate(params: &SubmitParams) -> Result<(), String> {
    for (value, name) in [
        (&params.form.student_name, "form.studentName"),
        (&params.form.grade, "form.grade"),
        (&params.form.board, "form.board"),
        (&params.form.academic_year, "form.academicYear"),
    ] {
        if value.trim().is_empty() {
            return Err(format!("{} must not be empty", name));
        }
    }
    if params.contacts.is_empty() {
        return Err("at least one contact is required".to_string());
    }
    for (i, contact) in params.contacts.iter().enumerate() {
        for (value, name) in [
            (&contact.phone, "phone"),
            (&contact.contact_name, "contactName"),
            (&contact.relation, "relation"),
        ] {
            if value.trim().is_empty() {
                return Err(format!("contacts[{}].{} must not be empty", i, name));
            }
        }
    }
    Ok(())
}

/// "" and missing both persist as explicit null; the stored shape is uniform
/// across records.
fn null_if_empty(value: Option<&String>) -> Value {
    match value {
        Some(s) if !s.trim().is_empty() => Value::String(s.trim().to_string()),
        _ => Value::Null,
    }
}

fn trimmed(s: &str) -> Value {
    Value::String(s.trim().to_string())
}

/// One photo upload: read the blob from its temp path and store it. Failure
/// here is always non-fatal to the submission; callers decide which fields
/// degrade to null.
fn upload_photo(
    store: &dyn ObjectStore,
    category: PhotoCategory,
    attachment: &PhotoAttachment,
) -> anyhow::Result<String> {
    let bytes = std::fs::read(&attachment.path)?;
    store.put(category, &attachment.name, &bytes)
}

pub enum SubmitError {
    BadParams(String),
    WriteFailed(String),
}

/// The submission workflow: best-effort student-photo upload, concurrent and
/// independent contact-photo uploads (settle-all, per-upload isolation),
/// optional-field normalization, then exactly one document write with
/// server-assigned timestamps. Uploads are not rolled back when the write
/// fails; orphaned blobs are accepted (see `photos.orphans`).
pub fn run_submission(
    conn: &Connection,
    store: &dyn ObjectStore,
    public_base: &str,
    params: &SubmitParams,
) -> Result<SubmissionOutcome, SubmitError> {
    validate(params).map_err(SubmitError::BadParams)?;

    let mut warnings: Vec<String> = Vec::new();

    let mut student_photo_url: Value = Value::Null;
    let mut student_photo_name: Value = Value::Null;
    if let Some(attachment) = &params.student_photo {
        match upload_photo(store, PhotoCategory::Student, attachment) {
            Ok(key) => {
                student_photo_url = Value::String(photos::build_url(public_base, &key));
                student_photo_name = Value::String(attachment.name.clone());
            }
            Err(e) => {
                eprintln!("enrolld: student photo upload failed: {e:?}");
                warnings.push(format!("student photo upload failed: {}", e));
            }
        }
    }

    // Contact uploads fan out concurrently; each task owns its blob path and
    // target key. Joining every handle gives settle-all semantics: one
    // failure (or panic) nulls only that contact's photo fields.
    let mut contact_photos: Vec<Option<(String, String)>> = vec![None; params.contacts.len()];
    std::thread::scope(|scope| {
        let handles: Vec<_> = params
            .contacts
            .iter()
            .enumerate()
            .filter_map(|(i, contact)| {
                contact.photo.as_ref().map(|attachment| {
                    let attachment = attachment.clone();
                    (
                        i,
                        attachment.name.clone(),
                        scope.spawn(move || {
                            upload_photo(store, PhotoCategory::Contact, &attachment)
                        }),
                    )
                })
            })
            .collect();

        for (i, name, handle) in handles {
            match handle.join() {
                Ok(Ok(key)) => {
                    contact_photos[i] = Some((photos::build_url(public_base, &key), name));
                }
                Ok(Err(e)) => {
                    eprintln!("enrolld: contact {} photo upload failed: {e:?}", i);
                    warnings.push(format!("contact {} photo upload failed: {}", i + 1, e));
                }
                Err(_) => {
                    eprintln!("enrolld: contact {} photo upload panicked", i);
                    warnings.push(format!("contact {} photo upload failed", i + 1));
                }
            }
        }
    });

    let contacts_doc: Vec<Value> = params
        .contacts
        .iter()
        .zip(contact_photos)
        .map(|(contact, photo)| {
            let (photo_url, photo_name) = match photo {
                Some((url, name)) => (Value::String(url), Value::String(name)),
                None => (Value::Null, Value::Null),
            };
            json!({
                "phone": contact.phone.trim(),
                "contactName": contact.contact_name.trim(),
                "relation": contact.relation.trim(),
                "educationQualification": null_if_empty(contact.education_qualification.as_ref()),
                "nameOfOrganisation": null_if_empty(contact.name_of_organisation.as_ref()),
                "designation": null_if_empty(contact.designation.as_ref()),
                "department": null_if_empty(contact.department.as_ref()),
                "photoURL": photo_url,
                "photoName": photo_name
            })
        })
        .collect();

    let id = Uuid::new_v4().to_string();
    let now = db::now_timestamp();
    let form = &params.form;
    let doc = json!({
        "studentName": trimmed(&form.student_name),
        "dateOfBirth": trimmed(&form.date_of_birth),
        "gender": trimmed(&form.gender),
        "schoolName": trimmed(&form.school_name),
        "grade": trimmed(&form.grade),
        "board": trimmed(&form.board),
        "branch": trimmed(&form.branch),
        "academicYear": trimmed(&form.academic_year),
        "area": trimmed(&form.area),
        "landmark": trimmed(&form.landmark),
        "city": trimmed(&form.city),
        "state": trimmed(&form.state),
        "pincode": trimmed(&form.pincode),
        "studentPhotoURL": student_photo_url,
        "studentPhotoName": student_photo_name,
        "contacts": contacts_doc,
        "createdAt": now,
        "updatedAt": now
    });

    let raw = match serde_json::to_string(&doc) {
        Ok(v) => v,
        Err(e) => return Err(SubmitError::WriteFailed(e.to_string())),
    };
    conn.execute(
        "INSERT INTO enrollments(id, doc, created_at, updated_at) VALUES(?, ?, ?, ?)",
        [&id, &raw, &now, &now],
    )
    .map_err(|e| SubmitError::WriteFailed(e.to_string()))?;

    Ok(SubmissionOutcome {
        id,
        created_at: now,
        warnings,
    })
}

/// Newest first. Rows without a timestamp keep their slots; the timestamped
/// rows are ordered among themselves and written back around them. Sorting
/// the whole slice with a timestamp-or-equal comparator is not a total order
/// and lets a gap row hide two timestamped rows from each other.
pub fn sort_newest_first(rows: &mut [(Option<String>, Value)]) {
    let mut slots: Vec<usize> = Vec::with_capacity(rows.len());
    let mut dated: Vec<(Option<String>, Value)> = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter_mut().enumerate() {
        if row.0.is_some() {
            slots.push(i);
            dated.push(std::mem::take(row));
        }
    }
    dated.sort_by(|a, b| b.0.cmp(&a.0));
    for (slot, row) in slots.into_iter().zip(dated) {
        rows[slot] = row;
    }
}

fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    // Public: the form writes without the submitter signing in.
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(store) = state.photos.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let params: SubmitParams = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };

    let public_base = setup::public_base_url(conn);
    match run_submission(conn, store, &public_base, &params) {
        Ok(outcome) => ok(
            &req.id,
            json!({
                "id": outcome.id,
                "createdAt": outcome.created_at,
                "warnings": outcome.warnings,
                "draft": default_draft()
            }),
        ),
        Err(SubmitError::BadParams(msg)) => err(&req.id, "bad_params", msg, None),
        // Draft stays with the user: no reset payload on a failed write.
        Err(SubmitError::WriteFailed(msg)) => err(
            &req.id,
            "db_insert_failed",
            format!("failed to submit enrollment: {}", msg),
            None,
        ),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err((code, message)) = require_admin(state) {
        return err(&req.id, code, message, None);
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // One bulk read per call; rowid order is write-acceptance order.
    let mut stmt = match conn
        .prepare("SELECT id, doc, created_at FROM enrollments ORDER BY rowid")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let fetched = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let raw: String = r.get(1)?;
            let created_at: String = r.get(2)?;
            Ok((id, raw, created_at))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let fetched = match fetched {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut rows: Vec<(Option<String>, Value)> = Vec::with_capacity(fetched.len());
    for (id, raw, created_at) in fetched {
        let mut doc: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        doc["id"] = Value::String(id);
        let ts = (!created_at.is_empty()).then_some(created_at);
        rows.push((ts, doc));
    }
    sort_newest_first(&mut rows);

    let enrollments: Vec<Value> = rows.into_iter().map(|(_, doc)| doc).collect();
    ok(
        &req.id,
        json!({
            "total": enrollments.len(),
            "enrollments": enrollments
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.submit" => Some(handle_submit(state, req)),
        "enrollments.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
