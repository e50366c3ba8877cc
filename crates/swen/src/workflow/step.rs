use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::{document::StepDocument, Error, Result};

/// Lifecycle of a single step. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepStatus {
    #[default]
    Ready,
    Running,
    Terminated,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Ready => "READY",
            StepStatus::Running => "RUNNING",
            StepStatus::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StepStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

type StatusCallback = dyn Fn(&str, StepStatus, StepStatus) + Send + Sync;

/// Named listener for status transitions.
///
/// Called with the step id, the current status and the status about to be
/// applied. It observes only; the transition happens regardless.
#[derive(Clone)]
pub struct StatusObserver {
    name: String,
    callback: Arc<StatusCallback>,
}

impl StatusObserver {
    pub fn new<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&str, StepStatus, StepStatus) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            callback: Arc::new(callback),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn notify(&self, step_id: &str, current: StepStatus, next: StepStatus) {
        (self.callback)(step_id, current, next)
    }
}

impl fmt::Debug for StatusObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusObserver")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One executable unit of a flow plus its routing metadata.
///
/// Identity and routing are fixed once built; only the exit code, status and
/// observer change afterwards.
#[derive(Debug, Clone)]
pub struct StepDefinition {
    pub(crate) id: String,
    /// Command line as written in the document
    pub(crate) step: Option<String>,
    /// `step` split into program and arguments
    pub(crate) command: Option<Vec<String>>,
    pub(crate) doc: Option<String>,
    pub(crate) with_stdin: bool,
    pub(crate) on_success: Option<String>,
    pub(crate) on_failure: Option<String>,
    /// Reserved, never consulted when routing
    pub(crate) on_exit_code: Option<serde_json::Value>,
    pub(crate) exit_code: Option<i32>,
    pub(crate) status: StepStatus,
    on_status_change: Option<StatusObserver>,
}

impl StepDefinition {
    /// A step that runs `command_line`, with no routing.
    pub fn new(id: impl Into<String>, command_line: Option<&str>) -> Result<Self> {
        let id = id.into();
        let command = command_line
            .map(|line| tokenize(&id, line))
            .transpose()?;

        Ok(Self {
            id,
            step: command_line.map(str::to_string),
            command,
            doc: None,
            with_stdin: false,
            on_success: None,
            on_failure: None,
            on_exit_code: None,
            exit_code: None,
            status: StepStatus::Ready,
            on_status_change: None,
        })
    }

    pub fn from_document(document: StepDocument) -> Result<Self> {
        let mut step = Self::new(document.id, document.step.as_deref())?;
        step.doc = document.doc;
        step.with_stdin = document.with_stdin;
        step.on_success = document.on_success;
        step.on_failure = document.on_failure;
        step.on_exit_code = document.on_exit_code;
        Ok(step)
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn with_stdin(mut self, with_stdin: bool) -> Self {
        self.with_stdin = with_stdin;
        self
    }

    pub fn on_success(mut self, target: impl Into<String>) -> Self {
        self.on_success = Some(target.into());
        self
    }

    pub fn on_failure(mut self, target: impl Into<String>) -> Self {
        self.on_failure = Some(target.into());
        self
    }

    pub fn with_status_observer(mut self, observer: StatusObserver) -> Self {
        self.on_status_change = Some(observer);
        self
    }

    pub fn set_status_observer(&mut self, observer: Option<StatusObserver>) {
        self.on_status_change = observer;
    }

    pub fn status_observer(&self) -> Option<&StatusObserver> {
        self.on_status_change.as_ref()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn command_line(&self) -> Option<&str> {
        self.step.as_deref()
    }

    pub fn command(&self) -> Option<&[String]> {
        self.command.as_deref()
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn pipes_stdin(&self) -> bool {
        self.with_stdin
    }

    pub fn success_target(&self) -> Option<&str> {
        self.on_success.as_deref()
    }

    pub fn failure_target(&self) -> Option<&str> {
        self.on_failure.as_deref()
    }

    pub fn exit_code_routes(&self) -> Option<&serde_json::Value> {
        self.on_exit_code.as_ref()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    /// Placeholder steps carry routing only and are never launched.
    pub fn is_placeholder(&self) -> bool {
        self.command.is_none()
    }

    /// Whether any explicit transition is declared, the reserved
    /// `on_exit_code` included.
    pub fn declares_transition(&self) -> bool {
        self.on_success.is_some() || self.on_failure.is_some() || self.on_exit_code.is_some()
    }

    /// Notifies the observer, then applies `next`.
    pub(crate) fn set_status(&mut self, next: StepStatus) {
        if let Some(observer) = &self.on_status_change {
            observer.notify(&self.id, self.status, next);
        }
        debug!("Step {} status: {} -> {}", self.id, self.status, next);
        self.status = next;
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

fn tokenize(id: &str, line: &str) -> Result<Vec<String>> {
    let words = shlex::split(line).ok_or_else(|| {
        Error::Validation(format!("Step '{}' has an unbalanced quote in: {}", id, line))
    })?;

    if words.is_empty() {
        return Err(Error::Validation(format!("Step '{}' has an empty command", id)));
    }

    Ok(words)
}

impl Serialize for StepDefinition {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("StepDefinition", 11)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("step", &self.step)?;
        state.serialize_field("command", &self.command)?;
        state.serialize_field("doc", &self.doc)?;
        state.serialize_field("with_stdin", &self.with_stdin)?;
        state.serialize_field("on_success", &self.on_success)?;
        state.serialize_field("on_failure", &self.on_failure)?;
        state.serialize_field("on_exit_code", &self.on_exit_code)?;
        state.serialize_field("exit_code", &self.exit_code)?;
        state.serialize_field("status", &self.status)?;
        state.serialize_field(
            "on_status_change",
            &self.on_status_change.as_ref().map(StatusObserver::name),
        )?;
        state.end()
    }
}

impl fmt::Display for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string_pretty(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}
