//! Batch orchestration.
//!
//! [`BatchEngine::process`] validates the outer request headers, selects the
//! wire format, then walks the sub-requests strictly in order:
//!
//! 1. dependency check (JSON batches without continue-on-error),
//! 2. entity-reference substitution (`/items/$1` -> `/items/42`),
//! 3. dispatch through the caller's [`Dispatcher`],
//! 4. reference capture for `POST` parts that created a resource.
//!
//! JSON batches are answered with a complete body. Multipart batches are
//! answered with a [`MultipartStream`] that dispatches one part per chunk, so
//! the first bytes can be written before later parts have run.

use std::collections::HashSet;
use std::fmt;
use std::io::{Cursor, Write};

use crate::error::{BatchError, DispatchError};
use crate::headers::split_unquoted;
use crate::json::{BatchDecoder, JsonPartsExtractor, SerdeJsonDecoder};
use crate::media_type::{MediaType, is_known_media_type};
use crate::multipart::{PartStream, PartsExtractor, into_unprocessable};
use crate::parser::{Parser, ParserConfig};
use crate::response::{
    BatchFormat, ResponsePart, SubResponse, assemble, generate_boundary, multipart_close,
    multipart_part,
};
use crate::types::{Header, HttpMethod, RequestDescriptor, find_header};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// `Prefer` tokens that enable continue-on-error.
const CONTINUE_ON_ERROR: [&str; 2] = ["continue-on-error", "odata.continue-on-error"];

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Executes one sub-request.
///
/// `catch_errors` mirrors continue-on-error: when set, application failures
/// should come back as error responses. An `Err` is an uncaught failure.
pub trait Dispatcher {
    fn dispatch(
        &mut self,
        request: &RequestDescriptor,
        catch_errors: bool,
    ) -> Result<SubResponse, DispatchError>;
}

impl<F> Dispatcher for F
where
    F: FnMut(&RequestDescriptor, bool) -> Result<SubResponse, DispatchError>,
{
    fn dispatch(
        &mut self,
        request: &RequestDescriptor,
        catch_errors: bool,
    ) -> Result<SubResponse, DispatchError> {
        self(request, catch_errors)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Limits and switches for a [`BatchEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Limits applied when decoding each multipart sub-request.
    pub parser: ParserConfig,
    /// Run multipart batches found inside a multipart batch instead of
    /// rejecting them.
    pub allow_nested_multipart: bool,
    /// Maximum number of sub-requests in one batch.
    pub max_parts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parser: ParserConfig::default(),
            allow_nested_multipart: false,
            max_parts: 1000,
        }
    }
}

/// Preferences read from the `Prefer` header, once per batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreferenceSet {
    pub continue_on_error: bool,
}

impl PreferenceSet {
    /// Parse a `Prefer` header value (`odata.continue-on-error`,
    /// `continue-on-error=true`, `return=minimal, continue-on-error`, …).
    pub fn from_header(value: Option<&str>) -> Self {
        let continue_on_error = value.is_some_and(|value| {
            split_unquoted(value, ',').into_iter().any(|preference| {
                let token = preference.split(';').next().unwrap_or_default();
                let (name, setting) = match token.split_once('=') {
                    Some((name, setting)) => (name.trim(), Some(setting.trim().trim_matches('"'))),
                    None => (token.trim(), None),
                };
                CONTINUE_ON_ERROR.iter().any(|p| p.eq_ignore_ascii_case(name))
                    && !setting.is_some_and(|s| s.eq_ignore_ascii_case("false"))
            })
        });
        Self { continue_on_error }
    }
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// The outer batch request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchRequest {
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
    /// Set when this request was itself decomposed from another batch.
    pub sub_request: bool,
}

impl BatchRequest {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: Vec::new(),
            body: body.into(),
            sub_request: false,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn as_sub_request(mut self) -> Self {
        self.sub_request = true;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// The assembled batch response.
///
/// `status` only says whether the batch was accepted; per-part outcomes live
/// in the body.
#[derive(Debug)]
pub struct BatchResponse<'a> {
    pub status: u16,
    pub headers: Vec<Header>,
    pub body: ResponseBody<'a>,
}

#[derive(Debug)]
pub enum ResponseBody<'a> {
    Full(Vec<u8>),
    Stream(MultipartStream<'a>),
}

impl BatchResponse<'_> {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Produce the whole body, running any remaining dispatches.
    pub fn into_bytes(self) -> Result<Vec<u8>, BatchError> {
        match self.body {
            ResponseBody::Full(bytes) => Ok(bytes),
            ResponseBody::Stream(stream) => stream.into_bytes(),
        }
    }

    /// Write the body to `writer`, flushing after every multipart part.
    pub fn write_body_to<W: Write>(self, writer: &mut W) -> Result<(), BatchError> {
        match self.body {
            ResponseBody::Full(bytes) => {
                writer.write_all(&bytes)?;
                writer.flush()?;
                Ok(())
            }
            ResponseBody::Stream(stream) => stream.write_to(writer),
        }
    }
}

fn batch_headers(content_type: &str) -> Vec<Header> {
    vec![
        Header::new("Content-Type", content_type),
        Header::new("Vary", "Accept, Prefer"),
        Header::new("X-Content-Type-Options", "nosniff"),
        Header::new("X-Frame-Options", "deny"),
    ]
}

// ---------------------------------------------------------------------------
// Per-invocation context
// ---------------------------------------------------------------------------

/// State owned by one `process` call: the entity-reference table, the ids
/// that succeeded so far, and the batch preferences.
#[derive(Debug, Default)]
struct BatchContext {
    preferences: PreferenceSet,
    /// `("$" + content id, created identifier)` in capture order.
    references: Vec<(String, String)>,
    succeeded: HashSet<String>,
}

impl BatchContext {
    fn new(preferences: PreferenceSet) -> Self {
        Self {
            preferences,
            ..Self::default()
        }
    }

    fn continue_on_error(&self) -> bool {
        self.preferences.continue_on_error
    }

    fn check_dependencies(&self, descriptor: &RequestDescriptor) -> Result<(), BatchError> {
        if self.continue_on_error() {
            return Ok(());
        }
        match descriptor
            .depends_on
            .iter()
            .find(|d| !self.succeeded.contains(*d))
        {
            Some(dependency) => Err(BatchError::FailedDependency {
                id: descriptor.id.clone().unwrap_or_default(),
                dependency: dependency.clone(),
            }),
            None => Ok(()),
        }
    }

    fn substitute(&self, descriptor: &mut RequestDescriptor) {
        if self.references.is_empty() || !descriptor.uri.contains('$') {
            return;
        }
        let before = descriptor.uri.clone();
        descriptor.rewrite_target(|target| replace_references(target, &self.references));
        tracing::debug!(from = %before, to = %descriptor.uri, "entity references substituted");
    }

    fn capture(&mut self, descriptor: &RequestDescriptor, response: &SubResponse) {
        if descriptor.method != HttpMethod::POST {
            return;
        }
        let (Some(content_id), Some(identifier)) =
            (descriptor.content_id(), response.created_resource.as_deref())
        else {
            return;
        };

        let key = format!("${content_id}");
        tracing::debug!(reference = %key, identifier, "entity reference captured");
        match self.references.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = identifier.to_string(),
            None => self.references.push((key, identifier.to_string())),
        }
    }

    /// Substitute, dispatch and capture one descriptor.
    fn execute(
        &mut self,
        dispatcher: &mut dyn Dispatcher,
        mut descriptor: RequestDescriptor,
        index: usize,
    ) -> Result<SubResponse, BatchError> {
        self.substitute(&mut descriptor);

        let catch_errors = self.continue_on_error();
        tracing::debug!(
            index,
            method = %descriptor.method,
            uri = %descriptor.uri,
            "dispatching sub-request"
        );
        let response = match dispatcher.dispatch(&descriptor, catch_errors) {
            Ok(response) => response,
            Err(e) if catch_errors => {
                tracing::warn!(index, error = %e, "sub-request failed, continuing");
                SubResponse::from_error(&BatchError::Dispatch(e))
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "sub-request failed, aborting batch");
                return Err(e.into());
            }
        };
        tracing::debug!(index, status = response.status, "sub-request answered");

        self.capture(&descriptor, &response);
        if response.is_success() {
            if let Some(id) = descriptor.id.as_deref().or(descriptor.content_id()) {
                self.succeeded.insert(id.to_string());
            }
        }
        Ok(response)
    }

    /// Turn a part-level failure into an error response under
    /// continue-on-error; propagate it otherwise.
    fn recover(&self, index: usize, error: BatchError) -> Result<SubResponse, BatchError> {
        if self.continue_on_error() {
            tracing::warn!(index, error = %error, "sub-request rejected, continuing");
            Ok(SubResponse::from_error(&error))
        } else {
            Err(error)
        }
    }
}

/// Replace every `$id` token in `target`, in a single left-to-right pass.
///
/// The longest matching token wins, so `$10` is not read as `$1` followed by
/// `0`. Replacement text is never rescanned. An identifier that is an
/// absolute path (`/items/42`) replaces everything before its token when the
/// token sits in the path component, so `/items/$1/parts` becomes
/// `/items/42/parts`. Other identifiers, and tokens in the query, are swapped
/// in place.
fn replace_references(target: &str, references: &[(String, String)]) -> String {
    let mut out = String::with_capacity(target.len());
    let mut rest = target;
    let mut in_query = false;
    while let Some(pos) = rest.find('$') {
        in_query |= rest[..pos].contains('?');
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let matched = references
            .iter()
            .filter(|(token, _)| rest.starts_with(token.as_str()))
            .max_by_key(|(token, _)| token.len());
        match matched {
            Some((token, identifier)) => {
                if identifier.starts_with('/') && !in_query {
                    out.clear();
                }
                out.push_str(identifier);
                rest = &rest[token.len()..];
            }
            None => {
                out.push('$');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Decomposes, dispatches and reassembles batch requests.
pub struct BatchEngine<D> {
    dispatcher: D,
    decoder: Box<dyn BatchDecoder>,
    config: EngineConfig,
}

impl<D: Dispatcher> BatchEngine<D> {
    pub fn new(dispatcher: D) -> Self {
        Self::with_config(dispatcher, EngineConfig::default())
    }

    pub fn with_config(dispatcher: D, config: EngineConfig) -> Self {
        Self {
            dispatcher,
            decoder: Box::new(SerdeJsonDecoder),
            config,
        }
    }

    /// Replace the decoder used for JSON batch envelopes.
    pub fn with_decoder(mut self, decoder: impl BatchDecoder + 'static) -> Self {
        self.decoder = Box::new(decoder);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn into_dispatcher(self) -> D {
        self.dispatcher
    }

    /// Process one batch request.
    ///
    /// Header problems are reported before anything is dispatched. A JSON
    /// batch is fully dispatched before this returns; a multipart batch
    /// returns at once with a [`ResponseBody::Stream`] that dispatches as it
    /// is read (or a buffered body when `request` is itself a sub-request).
    ///
    /// # Errors
    ///
    /// - [`BatchError::MissingExpectedHeader`] / [`BatchError::MalformedHeader`]
    ///   for an absent or invalid `Content-Type`.
    /// - [`BatchError::UnsupportedMediaType`] for a type that is neither JSON
    ///   nor `multipart/mixed`.
    /// - [`BatchError::Unprocessable`] for unusable media-type parameters.
    /// - [`BatchError::InvalidIndividualRequest`] for invalid JSON entries and
    ///   rejected nested batches.
    /// - [`BatchError::FailedDependency`] and [`BatchError::Dispatch`] when a
    ///   JSON batch stops early without continue-on-error.
    pub fn process(&mut self, request: BatchRequest) -> Result<BatchResponse<'_>, BatchError> {
        let (format, media_type) = select_format(&request)?;
        let preferences = PreferenceSet::from_header(request.header("Prefer"));
        tracing::debug!(
            ?format,
            continue_on_error = preferences.continue_on_error,
            sub_request = request.sub_request,
            "batch accepted"
        );
        let context = BatchContext::new(preferences);

        match format {
            BatchFormat::Json => self.process_json(&request, context),
            BatchFormat::Multipart => {
                if request.sub_request && !self.config.allow_nested_multipart {
                    return Err(nested_batch_rejected());
                }
                let stream = MultipartStream {
                    parts: PartsExtractor::from_media_type(Cursor::new(request.body), &media_type),
                    dispatcher: &mut self.dispatcher,
                    config: &self.config,
                    context,
                    boundary: generate_boundary(),
                    index: 0,
                    finished: false,
                };
                let headers = batch_headers(&stream.content_type());
                let body = if request.sub_request {
                    ResponseBody::Full(stream.into_bytes()?)
                } else {
                    ResponseBody::Stream(stream)
                };
                Ok(BatchResponse {
                    status: 200,
                    headers,
                    body,
                })
            }
        }
    }

    fn process_json(
        &mut self,
        request: &BatchRequest,
        mut context: BatchContext,
    ) -> Result<BatchResponse<'_>, BatchError> {
        let descriptors = JsonPartsExtractor::new(self.decoder.as_ref())
            .extract(&request.body, request.sub_request)?;
        check_part_count(descriptors.len(), &self.config)?;

        let mut parts = Vec::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.into_iter().enumerate() {
            if let Err(e) = context.check_dependencies(&descriptor) {
                tracing::warn!(index, error = %e, "dependency not satisfied, aborting batch");
                return Err(e);
            }
            let id = descriptor.id.clone();
            let response = context.execute(&mut self.dispatcher, descriptor, index)?;
            parts.push(ResponsePart { id, response });
        }

        Ok(BatchResponse {
            status: 200,
            headers: batch_headers(JSON_CONTENT_TYPE),
            body: ResponseBody::Full(assemble(&parts, BatchFormat::Json, "")?),
        })
    }
}

/// Decompose a batch into its sub-requests without dispatching anything.
///
/// Applies the same header validation as [`BatchEngine::process`]; every
/// part must decode.
pub fn decompose(
    request: &BatchRequest,
    config: &EngineConfig,
) -> Result<Vec<RequestDescriptor>, BatchError> {
    let (format, media_type) = select_format(request)?;
    let descriptors = match format {
        BatchFormat::Json => {
            JsonPartsExtractor::new(&SerdeJsonDecoder).extract(&request.body, request.sub_request)?
        }
        BatchFormat::Multipart => {
            let parts =
                PartsExtractor::from_media_type(Cursor::new(request.body.clone()), &media_type);
            let mut descriptors = Vec::new();
            for part in parts {
                check_part_count(descriptors.len() + 1, config)?;
                descriptors.push(Parser::with_config(config.parser.clone()).decode(part?)?);
            }
            descriptors
        }
    };
    check_part_count(descriptors.len(), config)?;
    Ok(descriptors)
}

/// Validate the outer `Content-Type` and pick the wire format.
fn select_format(request: &BatchRequest) -> Result<(BatchFormat, MediaType), BatchError> {
    let Some(content_type) = request.header("Content-Type") else {
        return Err(if request.body.is_empty() {
            BatchError::MalformedHeader("Content-Type not found.".into())
        } else {
            BatchError::MissingExpectedHeader(
                "a batch request with a body must carry a Content-Type header".into(),
            )
        });
    };

    let essence = content_type.split(';').next().unwrap_or_default().trim();
    if !is_known_media_type(essence) {
        return Err(BatchError::MalformedHeader(format!(
            "Content Type {essence} is invalid."
        )));
    }
    let media_type = MediaType::parse(content_type).map_err(into_unprocessable)?;

    let format = if media_type.is("application/json") {
        BatchFormat::Json
    } else if media_type.is("multipart/mixed") {
        BatchFormat::Multipart
    } else {
        return Err(BatchError::UnsupportedMediaType(media_type.type_and_subtype));
    };
    Ok((format, media_type))
}

fn check_part_count(count: usize, config: &EngineConfig) -> Result<(), BatchError> {
    if count > config.max_parts {
        return Err(BatchError::InvalidIndividualRequest(format!(
            "batch carries more than {} requests",
            config.max_parts
        )));
    }
    Ok(())
}

fn nested_batch_rejected() -> BatchError {
    BatchError::InvalidIndividualRequest("nested multipart batches are not allowed".into())
}

// ---------------------------------------------------------------------------
// MultipartStream
// ---------------------------------------------------------------------------

/// Lazily produced multipart response body.
///
/// Each item is one chunk of the body: the framed response of the next part
/// (dispatched on demand), then the closing delimiter. An error ends the
/// stream.
pub struct MultipartStream<'a> {
    parts: PartsExtractor<Cursor<Vec<u8>>>,
    dispatcher: &'a mut dyn Dispatcher,
    config: &'a EngineConfig,
    context: BatchContext,
    boundary: String,
    index: usize,
    finished: bool,
}

impl MultipartStream<'_> {
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}; charset=utf-8", self.boundary)
    }

    /// Write every chunk to `writer`, flushing after each part.
    pub fn write_to<W: Write>(self, writer: &mut W) -> Result<(), BatchError> {
        for chunk in self {
            writer.write_all(&chunk?)?;
            writer.flush()?;
        }
        Ok(())
    }

    pub fn into_bytes(self) -> Result<Vec<u8>, BatchError> {
        let mut out = Vec::new();
        for chunk in self {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    fn respond(&mut self, part: PartStream) -> Result<SubResponse, BatchError> {
        let index = self.index;
        self.index += 1;
        check_part_count(self.index, self.config)?;

        let descriptor = match Parser::with_config(self.config.parser.clone()).decode(part) {
            Ok(descriptor) => descriptor,
            Err(e) => return self.context.recover(index, e),
        };

        let nested = descriptor
            .content_type()
            .and_then(|ct| MediaType::parse(ct).ok())
            .is_some_and(|mt| mt.is("multipart/mixed"));
        if nested {
            return match self.run_nested(&descriptor) {
                Ok(response) => Ok(response),
                Err(e @ BatchError::Dispatch(_)) => Err(e),
                Err(e) => self.context.recover(index, e),
            };
        }

        self.context.execute(&mut *self.dispatcher, descriptor, index)
    }

    /// Run a multipart batch embedded in one part with its own context and
    /// return its buffered body.
    fn run_nested(&mut self, descriptor: &RequestDescriptor) -> Result<SubResponse, BatchError> {
        if !self.config.allow_nested_multipart {
            return Err(nested_batch_rejected());
        }
        let media_type = MediaType::parse(descriptor.content_type().unwrap_or_default())
            .map_err(into_unprocessable)?;
        tracing::debug!(uri = %descriptor.uri, "running nested multipart batch");

        let nested = MultipartStream {
            parts: PartsExtractor::from_media_type(
                Cursor::new(descriptor.body.clone()),
                &media_type,
            ),
            dispatcher: &mut *self.dispatcher,
            config: self.config,
            context: BatchContext::new(self.context.preferences),
            boundary: generate_boundary(),
            index: 0,
            finished: false,
        };
        let content_type = nested.content_type();
        let body = nested.into_bytes()?;
        Ok(SubResponse::new(200)
            .with_header("Content-Type", content_type)
            .with_body(body))
    }
}

impl Iterator for MultipartStream<'_> {
    type Item = Result<Vec<u8>, BatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let part = match self.parts.next() {
            Some(Ok(part)) => part,
            Some(Err(e)) => {
                self.finished = true;
                return Some(Err(e));
            }
            None => {
                self.finished = true;
                tracing::debug!(parts = self.index, "multipart batch complete");
                return Some(Ok(multipart_close(&self.boundary)));
            }
        };

        match self.respond(part) {
            Ok(response) => Some(Ok(multipart_part(&self.boundary, &response))),
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl fmt::Debug for MultipartStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartStream")
            .field("boundary", &self.boundary)
            .field("index", &self.index)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
