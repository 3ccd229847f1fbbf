//! Request builder for the dispatcher

use crate::error::{RestError, RestResult};
use crate::routing::{is_global_exempt, BucketKey};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde::Serialize;

const AUDIT_LOG_REASON: &str = "x-audit-log-reason";

/// Binary file sent alongside a JSON payload
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
            content_type: None,
        }
    }

    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// One call to the control-plane API
#[derive(Debug, Clone)]
pub struct RestRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    attachments: Vec<Attachment>,
    reason: Option<String>,
    authenticated: bool,
}

impl RestRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            attachments: Vec::new(),
            reason: None,
            authenticated: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> RestResult<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Add a file; the request is then sent as multipart form data
    #[must_use]
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Reason recorded in the guild audit log
    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Send without the bot token (webhook-token and public routes)
    #[must_use]
    pub fn authenticated(mut self, authenticated: bool) -> Self {
        self.authenticated = authenticated;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn bucket_key(&self) -> BucketKey {
        BucketKey::new(&self.method, &self.path)
    }

    pub fn is_global_exempt(&self) -> bool {
        is_global_exempt(&self.path)
    }

    /// Headers for one attempt
    pub(crate) fn headers(&self, token: Option<&str>, user_agent: &str) -> RestResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(user_agent)?);

        if self.authenticated {
            if let Some(token) = token {
                let mut value = header_value(&format!("Bot {token}"))?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        }

        if let Some(reason) = &self.reason {
            headers.insert(AUDIT_LOG_REASON, header_value(&urlencoding::encode(reason))?);
        }

        Ok(headers)
    }

    /// Build one attempt; multipart forms are single-use, so each retry rebuilds
    pub(crate) fn build(
        &self,
        http: &reqwest::Client,
        url: &str,
        headers: HeaderMap,
    ) -> RestResult<reqwest::RequestBuilder> {
        let mut builder = http.request(self.method.clone(), url).headers(headers);

        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }

        if self.attachments.is_empty() {
            if let Some(body) = &self.body {
                builder = builder.json(body);
            }
            return Ok(builder);
        }

        let mut form = Form::new();
        if let Some(body) = &self.body {
            let payload = Part::text(serde_json::to_string(body)?).mime_str("application/json")?;
            form = form.part("payload_json", payload);
        }
        for (i, file) in self.attachments.iter().enumerate() {
            let mut part = Part::bytes(file.data.clone()).file_name(file.filename.clone());
            if let Some(content_type) = &file.content_type {
                part = part.mime_str(content_type)?;
            }
            form = form.part(format!("files[{i}]"), part);
        }

        Ok(builder.multipart(form))
    }
}

fn header_value(value: &str) -> RestResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| RestError::InvalidHeader(e.to_string()))
}
