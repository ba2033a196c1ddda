use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("field '{0}' can't be rendered")]
    BadField(&'static str),
}

/// Inputs the rendering service needs to produce a certificate document.
#[derive(Debug, Clone)]
pub struct CertificateFields<'a> {
    pub holder_name: &'a str,
    pub subject_title: &'a str,
    pub issued_at: DateTime<Utc>,
    pub verification_code: &'a str,
}

/// Opaque document rendering seam. Rendering happens before anything is
/// persisted, so a failed render leaves no partial certificate behind.
pub trait CertificateRenderer: Send + Sync {
    fn render(&self, fields: &CertificateFields) -> Result<Vec<u8>, RenderError>;
}

/// Built-in renderer producing a self-contained HTML document. Deployments
/// with a proper document service swap this out at `create()` time.
pub struct HtmlCertificateRenderer;

impl CertificateRenderer for HtmlCertificateRenderer {
    fn render(&self, fields: &CertificateFields) -> Result<Vec<u8>, RenderError> {
        if fields.holder_name.trim().is_empty() {
            return Err(RenderError::BadField("holder_name"));
        }
        if fields.subject_title.trim().is_empty() {
            return Err(RenderError::BadField("subject_title"));
        }

        let document = format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Certificate of Completion</title></head>
<body>
  <main class="certificate">
    <h1>Certificate of Completion</h1>
    <p class="holder">{holder}</p>
    <p>has successfully completed</p>
    <p class="subject">{subject}</p>
    <p class="issued">Issued on {issued}</p>
    <p class="code">Verification code: {code}</p>
  </main>
</body>
</html>
"#,
            holder = escape(fields.holder_name),
            subject = escape(fields.subject_title),
            issued = fields.issued_at.format("%Y-%m-%d"),
            code = escape(fields.verification_code),
        );

        Ok(document.into_bytes())
    }
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
