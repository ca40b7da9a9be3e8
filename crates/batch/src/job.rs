//! Immutable job definitions.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::step::Step;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobDefinitionError {
    #[error("job '{0}' has no steps")]
    NoSteps(String),
    #[error("job '{job}' declares step '{step}' twice")]
    DuplicateStep { job: String, step: String },
    #[error("job name must not be empty")]
    EmptyName,
}

/// Named, ordered sequence of steps. Defined once at process start and
/// shared by every execution it produces.
pub struct Job {
    name: String,
    steps: Vec<Arc<dyn Step>>,
}

impl Job {
    pub fn builder(name: impl Into<String>) -> JobBuilder {
        JobBuilder {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

impl core::fmt::Debug for Job {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .finish()
    }
}

pub struct JobBuilder {
    name: String,
    steps: Vec<Arc<dyn Step>>,
}

impl JobBuilder {
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn shared_step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn build(self) -> Result<Job, JobDefinitionError> {
        if self.name.trim().is_empty() {
            return Err(JobDefinitionError::EmptyName);
        }
        if self.steps.is_empty() {
            return Err(JobDefinitionError::NoSteps(self.name));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name().to_string()) {
                return Err(JobDefinitionError::DuplicateStep {
                    job: self.name.clone(),
                    step: step.name().to_string(),
                });
            }
        }
        Ok(Job {
            name: self.name,
            steps: self.steps,
        })
    }
}
