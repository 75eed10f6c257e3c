// Demo repository
// Graphs the CLI can list, plan and run without any user code

use std::collections::BTreeMap;

use plan_engine::config::ResourceConfig;
use plan_engine::{
    AcquiredResource, BoxError, CompositeBuilder, ExpectationDefinition, ExpectationResult,
    GraphBuilder, GraphDefinition, GraphError, InputDefinition, InputSource, ModeDefinition,
    NodeConfig, NodeDefinition, OutputDefinition, PresetDefinition, Repository, ResolvedConfig,
    ResourceDefinition, RuntimeType, Value,
};

pub fn repository() -> Result<Repository, GraphError> {
    Repository::new("demos")
        .with_graph(math()?)?
        .with_graph(fan_in()?)?
        .with_graph(sum_list()?)?
        .with_graph(checked()?)?
        .with_graph(composite()?)?
        .with_graph(word_stats()?)?
        .with_graph(scaled()?)?
        .with_graph(flaky()?)
}

fn constant(name: &str, value: i64) -> NodeDefinition {
    NodeDefinition::new(name)
        .with_description(format!("Emits {}", value))
        .output(OutputDefinition::result(RuntimeType::Int))
        .compute(move |ctx| {
            ctx.output("result", value);
            Ok(())
        })
}

fn add_n(name: &str, n: f64) -> NodeDefinition {
    NodeDefinition::new(name)
        .input(InputDefinition::new("num", RuntimeType::Int))
        .output(OutputDefinition::result(RuntimeType::Int))
        .compute(move |ctx| {
            let num = ctx.input_number("num")?;
            ctx.output("result", num + n);
            Ok(())
        })
}

fn math() -> Result<GraphDefinition, GraphError> {
    let mut builder = GraphBuilder::new("math").with_description("return_one -> add_one");
    let return_one = builder.add_node(constant("return_one", 1));
    let add_one = builder.add_node(add_n("add_one", 1.0));
    builder.bind(&add_one).input("num", return_one.output("result"));
    builder.build()
}

fn fan_in() -> Result<GraphDefinition, GraphError> {
    let add = NodeDefinition::new("add")
        .input(InputDefinition::new("num_one", RuntimeType::Int))
        .input(InputDefinition::new("num_two", RuntimeType::Int))
        .output(OutputDefinition::result(RuntimeType::Int))
        .compute(|ctx| {
            let total = ctx.input_number("num_one")? + ctx.input_number("num_two")?;
            ctx.output("result", total);
            Ok(())
        });

    let mut builder =
        GraphBuilder::new("fan_in").with_description("return_two and return_three feed add");
    let two = builder.add_node(constant("return_two", 2));
    let three = builder.add_node(constant("return_three", 3));
    let add = builder.add_node(add);
    builder
        .bind(&add)
        .input("num_one", two.output("result"))
        .input("num_two", three.output("result"));
    builder.build()
}

fn sum_list() -> Result<GraphDefinition, GraphError> {
    let sum = NodeDefinition::new("sum")
        .input(InputDefinition::new("nums", RuntimeType::list(RuntimeType::Int)))
        .output(OutputDefinition::result(RuntimeType::Int))
        .compute(|ctx| {
            let nums = ctx.input("nums")?.as_array().ok_or("nums is not a list")?;
            let total: f64 = nums.iter().filter_map(Value::as_number).sum();
            ctx.output("result", total);
            Ok(())
        });

    let mut builder = GraphBuilder::new("sum_list")
        .with_description("Three constants fanned into one list input");
    let outputs = vec![
        builder.add_node(constant("return_one", 1)).output("result"),
        builder.add_node(constant("return_two", 2)).output("result"),
        builder.add_node(constant("return_three", 3)).output("result"),
    ];
    let sum = builder.add_node(sum);
    builder.bind(&sum).fan_in("nums", outputs);
    builder.build()
}

/// Seed comes from node config (`nodes.seed.config`), checked on the way in and out
fn checked() -> Result<GraphDefinition, GraphError> {
    let seed = NodeDefinition::new("seed")
        .output(OutputDefinition::result(RuntimeType::Int))
        .compute(|ctx| {
            let value = ctx.config().as_number().unwrap_or(1.0);
            ctx.output("result", value);
            Ok(())
        });

    let positive = ExpectationDefinition::new("positive", |value| {
        match value.as_number() {
            Some(n) if n > 0.0 => ExpectationResult::passed(),
            _ => ExpectationResult::failed(format!("expected a positive number, got {}", value)),
        }
    });
    let below_hundred = ExpectationDefinition::new("below_hundred", |value| {
        let n = value.as_number().unwrap_or(f64::MAX);
        ExpectationResult::from_bool(n < 100.0).with_metadata("value", n)
    });

    let add_one = NodeDefinition::new("add_one")
        .input(InputDefinition::new("num", RuntimeType::Int).with_expectation(positive))
        .output(OutputDefinition::result(RuntimeType::Int).with_expectation(below_hundred))
        .compute(|ctx| {
            let num = ctx.input_number("num")?;
            ctx.output("result", num + 1.0);
            Ok(())
        });

    let mut builder = GraphBuilder::new("checked")
        .with_description("Configurable seed with input and output expectations");
    let seed = builder.add_node(seed);
    let add_one = builder.add_node(add_one);
    builder.bind(&add_one).input("num", seed.output("result"));
    builder.preset(PresetDefinition::new(
        "negative",
        plan_engine::graph::DEFAULT_MODE,
        ResolvedConfig::default()
            .with_node("seed", NodeConfig::new().with_config(Value::from(-3i64))),
    ));
    builder.build()
}

fn composite() -> Result<GraphDefinition, GraphError> {
    let mut inner = GraphBuilder::new("plus_three");
    let add_one = inner.add_node(add_n("add_one", 1.0));
    let add_two = inner.add_node(add_n("add_two", 2.0));
    inner.bind(&add_two).input("num", add_one.output("result"));
    let plus_three = CompositeBuilder::new("plus_three", inner.build()?)
        .with_description("add_one then add_two")
        .map_input("num", "add_one", "num")
        .map_output("result", "add_two", "result")
        .build()?;

    let mut builder =
        GraphBuilder::new("composite").with_description("return_one -> plus_three -> double");
    let return_one = builder.add_node(constant("return_one", 1));
    let plus_three = builder.add_node(plus_three);
    let double = builder.add_node(
        NodeDefinition::new("double")
            .input(InputDefinition::new("num", RuntimeType::Int))
            .output(OutputDefinition::result(RuntimeType::Int))
            .compute(|ctx| {
                let num = ctx.input_number("num")?;
                ctx.output("result", num * 2.0);
                Ok(())
            }),
    );
    builder.bind(&plus_three).input("num", return_one.output("result"));
    builder.bind(&double).input("num", plus_three.output("result"));
    builder.build()
}

/// Text comes from config: a literal (`inputs.text: ...`) or a file (`{path, format: text}`)
fn word_stats() -> Result<GraphDefinition, GraphError> {
    let stats = NodeDefinition::new("stats")
        .input(InputDefinition::new("text", RuntimeType::String))
        .output(OutputDefinition::new("words", RuntimeType::Int))
        .output(OutputDefinition::new("lines", RuntimeType::Int))
        .output(OutputDefinition::new("longest", RuntimeType::String).optional())
        .compute(|ctx| {
            let text = ctx.input("text")?.as_str().ok_or("text is not a string")?.to_string();
            let words: Vec<&str> = text.split_whitespace().collect();
            ctx.output("words", words.len() as i64);
            ctx.output("lines", text.lines().count() as i64);
            if let Some(longest) = words.iter().max_by_key(|w| w.len()) {
                ctx.output("longest", *longest);
            }
            Ok(())
        });

    let shout = NodeDefinition::new("shout")
        .input(InputDefinition::new("word", RuntimeType::String))
        .output(OutputDefinition::result(RuntimeType::String))
        .compute(|ctx| {
            let word = ctx.input("word")?.as_str().ok_or("word is not a string")?;
            let loud = word.to_uppercase();
            ctx.log_info(format!("shouting '{}'", loud));
            ctx.output("result", loud);
            Ok(())
        });

    let mut builder = GraphBuilder::new("word_stats")
        .with_description("Counts words; shout is skipped when the text is empty");
    let stats = builder.add_node(stats);
    let shout = builder.add_node(shout);
    builder.bind(&shout).input("word", stats.output("longest"));
    builder.preset(PresetDefinition::new(
        "sample",
        plan_engine::graph::DEFAULT_MODE,
        ResolvedConfig::default().with_node(
            "stats",
            NodeConfig::new().with_input("text", InputSource::value("the quick brown fox\njumped")),
        ),
    ));
    builder.build()
}

/// The multiplier is a mode resource: fixed in `local`, read from config in `configured`
fn scaled() -> Result<GraphDefinition, GraphError> {
    let scale = NodeDefinition::new("scale")
        .input(InputDefinition::new("num", RuntimeType::Int))
        .output(OutputDefinition::result(RuntimeType::Int))
        .requires_resource("multiplier")
        .with_metadata(|config| {
            let mut metadata = BTreeMap::new();
            metadata.insert("storage".to_string(), config.storage.label().to_string());
            metadata
        })
        .compute(|ctx| {
            let factor = ctx.resource::<i64>("multiplier")?;
            let num = ctx.input_number("num")?;
            ctx.output("result", num * *factor as f64);
            Ok(())
        });

    let configured = ResourceDefinition::from_fn(|config: Value| async move {
        let factor = config
            .get("factor")
            .and_then(Value::as_number)
            .ok_or_else(|| BoxError::from("resources.multiplier.config.factor is required"))?;
        Ok::<_, BoxError>(AcquiredResource::new(factor as i64))
    });

    let mut builder =
        GraphBuilder::new("scaled").with_description("return_two scaled by a mode resource");
    let two = builder.add_node(constant("return_two", 2));
    let scale = builder.add_node(scale);
    builder.bind(&scale).input("num", two.output("result"));
    builder
        .mode(
            ModeDefinition::new("local")
                .with_description("Fixed multiplier of 10")
                .resource("multiplier", ResourceDefinition::value(10i64)),
        )
        .mode(
            ModeDefinition::new("configured")
                .with_description("Multiplier from resources.multiplier.config.factor")
                .resource("multiplier", configured),
        );
    builder.preset(PresetDefinition::new(
        "triple",
        "configured",
        triple_config(),
    ));
    builder.build()
}

fn triple_config() -> ResolvedConfig {
    let factor = BTreeMap::from([("factor".to_string(), Value::from(3i64))]);
    let mut config = ResolvedConfig::default();
    config.resources.insert(
        "multiplier".to_string(),
        ResourceConfig {
            config: Value::Object(factor),
        },
    );
    config
}

fn flaky() -> Result<GraphDefinition, GraphError> {
    let always_fail = NodeDefinition::new("always_fail")
        .output(OutputDefinition::result(RuntimeType::Int))
        .compute(|_| Err::<(), BoxError>("I am a failure".into()));

    let mut builder = GraphBuilder::new("flaky")
        .with_description("always_fail next to an independent return_two");
    builder.add_node(always_fail);
    builder.add_node(constant("return_two", 2));
    builder.build()
}
