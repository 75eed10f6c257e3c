// Compute Context
// What a user compute body sees: bound inputs, config, resources and an event sink

use crate::error::BoxError;
use crate::execution::events::{LogLevel, LogRecord, LogSink};
use crate::execution::resources::ResourceView;
use crate::graph::ExpectationResult;
use crate::types::Value;

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Events a step can produce; the only things user code may emit
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    OutputProduced {
        output_name: String,
        value: Value,
    },
    ExpectationEvaluated {
        name: String,
        success: bool,
        message: Option<String>,
        metadata: BTreeMap<String, Value>,
    },
    Materialized {
        path: String,
        description: Option<String>,
    },
}

impl StepEvent {
    pub fn output(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::OutputProduced {
            output_name: name.into(),
            value: value.into(),
        }
    }

    pub fn expectation(name: impl Into<String>, result: ExpectationResult) -> Self {
        Self::ExpectationEvaluated {
            name: name.into(),
            success: result.success,
            message: result.message,
            metadata: result.metadata,
        }
    }
}

/// Passed to compute bodies by `&mut`; collects emitted events in order
pub struct ComputeContext {
    run_id: String,
    step_key: String,
    node_handle: String,
    inputs: BTreeMap<String, Value>,
    config: Value,
    resources: ResourceView,
    log_sink: Arc<dyn LogSink>,
    events: Vec<StepEvent>,
}

impl ComputeContext {
    pub fn new(
        run_id: impl Into<String>,
        step_key: impl Into<String>,
        node_handle: impl Into<String>,
        inputs: BTreeMap<String, Value>,
        config: Value,
        resources: ResourceView,
        log_sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            step_key: step_key.into(),
            node_handle: node_handle.into(),
            inputs,
            config,
            resources,
            log_sink,
            events: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn step_key(&self) -> &str {
        &self.step_key
    }

    pub fn node_handle(&self) -> &str {
        &self.node_handle
    }

    /// Bound value of an input; errors when the input was not bound
    pub fn input(&self, name: &str) -> Result<&Value, BoxError> {
        self.inputs
            .get(name)
            .ok_or_else(|| format!("step '{}' has no input named '{}'", self.step_key, name).into())
    }

    /// Bound value of an input, as a number
    pub fn input_number(&self, name: &str) -> Result<f64, BoxError> {
        let value = self.input(name)?;
        value.as_number().ok_or_else(|| {
            format!("input '{}' is not a number: {}", name, value.preview(40)).into()
        })
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.contains_key(name)
    }

    pub fn inputs(&self) -> &BTreeMap<String, Value> {
        &self.inputs
    }

    /// Node config payload; Null when none was configured
    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Declared resource of type `T`
    pub fn resource<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, BoxError> {
        if !self.resources.is_allowed(name) {
            return Err(format!(
                "step '{}' did not declare resource '{}'",
                self.step_key, name
            )
            .into());
        }
        self.resources.get::<T>(name).ok_or_else(|| {
            format!("resource '{}' is not available with the requested type", name).into()
        })
    }

    pub fn output(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.events.push(StepEvent::output(name, value));
    }

    pub fn expectation(&mut self, name: impl Into<String>, result: ExpectationResult) {
        self.events.push(StepEvent::expectation(name, result));
    }

    pub fn materialized(&mut self, path: impl Into<String>, description: Option<String>) {
        self.events.push(StepEvent::Materialized {
            path: path.into(),
            description,
        });
    }

    pub fn emit(&mut self, event: StepEvent) {
        self.events.push(event);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let record = LogRecord::new(level, message, &self.run_id).for_step(&self.step_key);
        self.log_sink.log(&record);
    }

    pub fn log_info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn log_warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn events(&self) -> &[StepEvent] {
        &self.events
    }

    pub(crate) fn into_events(self) -> Vec<StepEvent> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::events::MemoryLogSink;
    use crate::execution::resources::{AcquiredResource, Resources};
    use std::collections::BTreeSet;

    fn make_context(sink: MemoryLogSink, resources: ResourceView) -> ComputeContext {
        let mut inputs = BTreeMap::new();
        inputs.insert("num".to_string(), Value::from(3i64));
        ComputeContext::new(
            "run-1",
            "add_one.compute",
            "add_one",
            inputs,
            Value::from("cfg"),
            resources,
            Arc::new(sink),
        )
    }

    #[test]
    fn test_inputs_and_events() {
        let mut ctx = make_context(MemoryLogSink::new(), ResourceView::empty());
        assert_eq!(ctx.input_number("num").unwrap(), 3.0);
        assert!(ctx.input("missing").is_err());
        assert_eq!(ctx.config(), &Value::from("cfg"));

        ctx.output("result", 4i64);
        ctx.expectation("positive", ExpectationResult::passed());
        ctx.materialized("/tmp/out.json", None);

        let events = ctx.into_events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], StepEvent::output("result", 4i64));
        assert!(matches!(events[1], StepEvent::ExpectationEvaluated { success: true, .. }));
    }

    #[test]
    fn test_log_records_carry_step() {
        let sink = MemoryLogSink::new();
        let ctx = make_context(sink.clone(), ResourceView::empty());
        ctx.log_info("working");

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].run_id, "run-1");
        assert_eq!(records[0].step_key.as_deref(), Some("add_one.compute"));
    }

    #[test]
    fn test_resource_requires_declaration() {
        let mut resources = Resources::empty();
        resources.insert("db", AcquiredResource::new("sqlite://memory".to_string()));
        let resources = Arc::new(resources);
        let allowed: BTreeSet<String> = ["db".to_string()].into_iter().collect();

        let ctx = make_context(MemoryLogSink::new(), resources.view(&allowed));
        assert_eq!(ctx.resource::<String>("db").unwrap().as_str(), "sqlite://memory");
        assert!(ctx.resource::<i64>("db").is_err());

        let ctx = make_context(MemoryLogSink::new(), resources.view(&BTreeSet::new()));
        let err = ctx.resource::<String>("db").unwrap_err();
        assert!(err.to_string().contains("did not declare"));
    }
}
