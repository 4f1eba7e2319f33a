use std::collections::HashMap;

use axum::extract::Multipart;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    storage::{ext_from_mime, mime_from_path, FileUpload},
};

/// Multipart form split into its file parts and text fields.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub files: Vec<FileUpload>,
    pub fields: HashMap<String, String>,
}

/// Normalizes a client-supplied object key: `/` separators, no leading
/// slash, no empty, `.` or `..` segments.
pub fn object_key(raw: &str) -> Option<String> {
    let normalized = raw.replace('\\', "/");
    let segments: Vec<&str> = normalized
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if segments.is_empty() || segments.iter().any(|s| *s == "..") {
        return None;
    }
    Some(segments.join("/"))
}

/// Key for an upload: `prefix` + file name, or a generated name when the
/// part carries none.
fn upload_key(prefix: Option<&str>, file_name: Option<&str>, content_type: &str) -> ApiResult<String> {
    let name = match file_name {
        Some(name) => name.to_string(),
        None => format!(
            "upload-{}.{}",
            Uuid::new_v4(),
            ext_from_mime(content_type).unwrap_or("bin")
        ),
    };
    let joined = match prefix {
        Some(p) if !p.trim().is_empty() => format!("{}/{}", p.trim(), name),
        _ => name,
    };
    object_key(&joined).ok_or_else(|| ApiError::Validation(format!("Invalid file name {joined:?}")))
}

/// Reads `files` / `files[]` parts and every text field. A `prefix` field
/// must come before the files it applies to.
pub async fn read_upload_form(mut mp: Multipart) -> ApiResult<UploadForm> {
    let mut form = UploadForm::default();
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "files" || name == "files[]" {
            let file_name = field.file_name().map(str::to_string);
            let declared = field.content_type().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::Validation(format!("Unreadable file part: {e}")))?;
            let key = upload_key(
                form.fields.get("prefix").map(String::as_str),
                file_name.as_deref(),
                declared.as_deref().unwrap_or("application/octet-stream"),
            )?;
            // Browsers send octet-stream for unknown types; the extension knows better.
            let content_type = match declared {
                Some(ct) if ct != "application/octet-stream" => ct,
                _ => mime_from_path(&key).to_string(),
            };
            form.files.push(FileUpload {
                key,
                body: data,
                content_type,
            });
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::Validation(format!("Unreadable field {name}: {e}")))?;
            form.fields.insert(name, value);
        }
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_are_normalized() {
        assert_eq!(object_key("index.html").as_deref(), Some("index.html"));
        assert_eq!(object_key("/css//site.css").as_deref(), Some("css/site.css"));
        assert_eq!(object_key("a\\b\\c.js").as_deref(), Some("a/b/c.js"));
        assert_eq!(object_key("./a/./b").as_deref(), Some("a/b"));
        assert_eq!(object_key("../etc/passwd"), None);
        assert_eq!(object_key("a/../../b"), None);
        assert_eq!(object_key("///"), None);
    }

    #[test]
    fn upload_keys() {
        assert_eq!(
            upload_key(Some("assets"), Some("logo.png"), "image/png").unwrap(),
            "assets/logo.png"
        );
        assert_eq!(upload_key(None, Some("index.html"), "text/html").unwrap(), "index.html");
        let generated = upload_key(None, None, "image/png").unwrap();
        assert!(generated.starts_with("upload-") && generated.ends_with(".png"));
        assert!(upload_key(Some(".."), Some("x"), "text/plain").is_err());
    }
}
