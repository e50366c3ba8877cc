use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::fmt;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use crate::{
    document::FlowDocument,
    workflow::step::{StatusObserver, StepDefinition},
    Error, Result,
};

/// Steps of one workflow document, keyed by id in document order, plus the
/// traversal cursor.
///
/// A flow is walked once. Each call to [`Flow::next_step`] decides the next
/// step from the exit code the current step has recorded so far, so the
/// caller must execute a step before asking for the one after it.
#[derive(Debug, Clone)]
pub struct Flow {
    pub id: Option<String>,
    pub doc: Option<String>,
    steps: IndexMap<String, StepDefinition>,
    current_step: Option<usize>,
    finished: bool,
}

impl Flow {
    pub fn from_document(document: FlowDocument) -> Result<Self> {
        let steps = document
            .flow
            .unwrap_or_default()
            .into_iter()
            .map(StepDefinition::from_document)
            .collect::<Result<Vec<_>>>()?;

        let mut flow = Self::from_steps(steps)?;
        flow.id = document.id;
        flow.doc = document.doc;

        debug!("Created {} steps: {:?}", flow.steps.len(), flow.steps.keys().collect::<Vec<_>>());
        Ok(flow)
    }

    pub fn from_steps(steps: impl IntoIterator<Item = StepDefinition>) -> Result<Self> {
        let mut map = IndexMap::new();
        for step in steps {
            if map.contains_key(&step.id) {
                return Err(Error::Validation(format!("Duplicate step id: {}", step.id)));
            }
            map.insert(step.id.clone(), step);
        }

        let flow = Self {
            id: None,
            doc: None,
            steps: map,
            current_step: None,
            finished: false,
        };
        flow.validate()?;
        Ok(flow)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        Self::from_document(FlowDocument::from_yaml(data)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Self::from_document(FlowDocument::from_reader(reader)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_document(FlowDocument::from_path(path)?)
    }

    /// Every transition must name a step of this flow.
    fn validate(&self) -> Result<()> {
        for step in self.steps.values() {
            for target in [&step.on_success, &step.on_failure].into_iter().flatten() {
                if !self.steps.contains_key(target) {
                    return Err(Error::Validation(format!(
                        "Step '{}' transitions to unknown step '{}'",
                        step.id, target
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.get(id)
    }

    /// Installs (or clears) the status observer of one step. The only change
    /// a caller may make to a step once the flow is built.
    pub fn set_status_observer(&mut self, id: &str, observer: Option<StatusObserver>) -> Result<()> {
        let step = self
            .steps
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("step '{}'", id)))?;
        step.set_status_observer(observer);
        Ok(())
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepDefinition> {
        self.steps.values()
    }

    pub fn current_step(&self) -> Option<&StepDefinition> {
        self.current_step
            .and_then(|index| self.steps.get_index(index))
            .map(|(_, step)| step)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Advances the cursor and returns the step to run next, or `None` once
    /// the traversal is over. After `None` it keeps returning `None`.
    pub fn next_step(&mut self) -> Result<Option<&mut StepDefinition>> {
        if self.finished {
            return Ok(None);
        }

        let next = match self.resolve_next()? {
            Some(index) => index,
            None => {
                debug!("No more steps to process. Stopping!");
                self.finished = true;
                return Ok(None);
            }
        };

        self.current_step = Some(next);
        let (id, step) = self
            .steps
            .get_index_mut(next)
            .ok_or_else(|| Error::NotFound(format!("step at position {}", next)))?;
        debug!("Next step: {:?}", id);
        Ok(Some(step))
    }

    fn resolve_next(&self) -> Result<Option<usize>> {
        debug!(
            "Determining next step (current-step={:?})...",
            self.current_step().map(|step| step.id.as_str())
        );

        if self.steps.is_empty() {
            return Ok(None);
        }

        let current_index = match self.current_step {
            None => return Ok(Some(0)),
            Some(index) => index,
        };
        let current = &self.steps[current_index];
        let is_last = current_index + 1 == self.steps.len();

        if is_last && !current.declares_transition() {
            return Ok(None);
        }

        let target = if current.exit_code == Some(0) {
            current.on_success.as_deref()
        } else {
            current.on_failure.as_deref()
        };

        match target {
            Some(id) => self
                .steps
                .get_index_of(id)
                .map(Some)
                .ok_or_else(|| Error::NotFound(format!("step '{}' referenced by '{}'", id, current.id))),
            None if is_last => Ok(None),
            None => Ok(Some(current_index + 1)),
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl Serialize for Flow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Flow", 4)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("doc", &self.doc)?;
        state.serialize_field("steps", &self.steps)?;
        state.serialize_field("current_step", &self.current_step().map(|step| &step.id))?;
        state.end()
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string_pretty(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}
