// Test Fixtures
// Small graphs shared by the unit tests

use crate::error::BoxError;
use crate::graph::{
    CompositeBuilder, ExpectationDefinition, ExpectationResult, GraphBuilder, GraphDefinition,
    InputDefinition, NodeDefinition, OutputDefinition,
};
use crate::types::{RuntimeType, Value};

pub const FAILURE_MESSAGE: &str = "I am a failure";

pub fn constant(name: &str, value: i64) -> NodeDefinition {
    NodeDefinition::new(name)
        .output(OutputDefinition::result(RuntimeType::Int))
        .compute(move |ctx| {
            ctx.output("result", value);
            Ok(())
        })
}

pub fn add_n(name: &str, n: f64) -> NodeDefinition {
    NodeDefinition::new(name)
        .input(InputDefinition::new("num", RuntimeType::Int))
        .output(OutputDefinition::result(RuntimeType::Int))
        .compute(move |ctx| {
            let num = ctx.input_number("num")?;
            ctx.output("result", num + n);
            Ok(())
        })
}

/// return_one -> add_one
pub fn math_graph() -> GraphDefinition {
    let mut builder = GraphBuilder::new("math");
    let return_one = builder.add_node(constant("return_one", 1));
    let add_one = builder.add_node(add_n("add_one", 1.0));
    builder.bind(&add_one).input("num", return_one.output("result"));
    builder.build().unwrap()
}

/// return_one -> add_one -> add_two
pub fn chain_graph() -> GraphDefinition {
    let mut builder = GraphBuilder::new("chain");
    let return_one = builder.add_node(constant("return_one", 1));
    let add_one = builder.add_node(add_n("add_one", 1.0));
    let add_two = builder.add_node(add_n("add_two", 2.0));
    builder.bind(&add_one).input("num", return_one.output("result"));
    builder.bind(&add_two).input("num", add_one.output("result"));
    builder.build().unwrap()
}

/// return_two and return_three feed the two inputs of add
pub fn fan_in_graph() -> GraphDefinition {
    let add = NodeDefinition::new("add")
        .input(InputDefinition::new("num_one", RuntimeType::Int))
        .input(InputDefinition::new("num_two", RuntimeType::Int))
        .output(OutputDefinition::result(RuntimeType::Int))
        .compute(|ctx| {
            let total = ctx.input_number("num_one")? + ctx.input_number("num_two")?;
            ctx.output("result", total);
            Ok(())
        });

    let mut builder = GraphBuilder::new("fan_in");
    let two = builder.add_node(constant("return_two", 2));
    let three = builder.add_node(constant("return_three", 3));
    let add = builder.add_node(add);
    builder
        .bind(&add)
        .input("num_one", two.output("result"))
        .input("num_two", three.output("result"));
    builder.build().unwrap()
}

/// return_two and return_three both bound to the list input of sum
pub fn list_fan_in_graph() -> GraphDefinition {
    let sum = NodeDefinition::new("sum")
        .input(InputDefinition::new("nums", RuntimeType::list(RuntimeType::Int)))
        .output(OutputDefinition::result(RuntimeType::Int))
        .compute(|ctx| {
            let nums = ctx.input("nums")?.as_array().ok_or("nums is not a list")?;
            let total: f64 = nums.iter().filter_map(Value::as_number).sum();
            ctx.output("result", total);
            Ok(())
        });

    let mut builder = GraphBuilder::new("list_fan_in");
    let two = builder.add_node(constant("return_two", 2));
    let three = builder.add_node(constant("return_three", 3));
    let sum = builder.add_node(sum);
    builder
        .bind(&sum)
        .fan_in("nums", vec![two.output("result"), three.output("result")]);
    builder.build().unwrap()
}

pub fn checked_graph() -> GraphDefinition {
    checked_graph_with_seed(1)
}

/// Source node (named return_one) emitting `seed`, feeding an add_one whose input must
/// be positive and whose output must stay below ten
pub fn checked_graph_with_seed(seed: i64) -> GraphDefinition {
    let positive = ExpectationDefinition::new("positive", |value| {
        if value.as_number().map_or(false, |n| n > 0.0) {
            ExpectationResult::passed()
        } else {
            ExpectationResult::failed("num must be positive")
        }
    });
    let below_ten = ExpectationDefinition::new("below_ten", |value| {
        ExpectationResult::from_bool(value.as_number().map_or(false, |n| n < 10.0))
    });

    let add_one = NodeDefinition::new("add_one")
        .input(InputDefinition::new("num", RuntimeType::Int).with_expectation(positive))
        .output(OutputDefinition::result(RuntimeType::Int).with_expectation(below_ten))
        .compute(|ctx| {
            let num = ctx.input_number("num")?;
            ctx.output("result", num + 1.0);
            Ok(())
        });

    let mut builder = GraphBuilder::new("checked");
    let source = builder.add_node(constant("return_one", seed));
    let add_one = builder.add_node(add_one);
    builder.bind(&add_one).input("num", source.output("result"));
    builder.build().unwrap()
}

/// return_one -> plus_three { add_one -> add_two } -> double
pub fn composite_graph() -> GraphDefinition {
    let mut inner = GraphBuilder::new("plus_three_inner");
    let add_one = inner.add_node(add_n("add_one", 1.0));
    let add_two = inner.add_node(add_n("add_two", 2.0));
    inner.bind(&add_two).input("num", add_one.output("result"));
    let plus_three = CompositeBuilder::new("plus_three", inner.build().unwrap())
        .map_input("num", "add_one", "num")
        .map_output("result", "add_two", "result")
        .build()
        .unwrap();

    let double = NodeDefinition::new("double")
        .input(InputDefinition::new("num", RuntimeType::Int))
        .output(OutputDefinition::result(RuntimeType::Int))
        .compute(|ctx| {
            let num = ctx.input_number("num")?;
            ctx.output("result", num * 2.0);
            Ok(())
        });

    let mut builder = GraphBuilder::new("composite");
    let return_one = builder.add_node(constant("return_one", 1));
    let plus_three = builder.add_node(plus_three);
    let double = builder.add_node(double);
    builder.bind(&plus_three).input("num", return_one.output("result"));
    builder.bind(&double).input("num", plus_three.output("result"));
    builder.build().unwrap()
}

/// A single add_one whose required input nothing binds
pub fn unbound_graph() -> GraphDefinition {
    let mut builder = GraphBuilder::new("unbound");
    builder.add_node(add_n("add_one", 1.0));
    builder.build().unwrap()
}

/// always_fail raises; return_two is independent of it
pub fn failing_graph() -> GraphDefinition {
    let always_fail = NodeDefinition::new("always_fail")
        .output(OutputDefinition::result(RuntimeType::Int))
        .compute(|_| Err::<(), BoxError>(FAILURE_MESSAGE.into()));

    let mut builder = GraphBuilder::new("failing");
    builder.add_node(always_fail);
    builder.add_node(constant("return_two", 2));
    builder.build().unwrap()
}

/// maybe never fires its optional `extra` output; consume and after_consume read it
pub fn optional_graph() -> GraphDefinition {
    let maybe = NodeDefinition::new("maybe")
        .output(OutputDefinition::result(RuntimeType::Int))
        .output(OutputDefinition::new("extra", RuntimeType::Int).optional())
        .compute(|ctx| {
            ctx.output("result", 1i64);
            Ok(())
        });

    let mut builder = GraphBuilder::new("optional");
    let maybe = builder.add_node(maybe);
    let consume = builder.add_node(add_n("consume", 1.0));
    let after = builder.add_node(add_n("after_consume", 1.0));
    builder.bind(&consume).input("num", maybe.output("extra"));
    builder.bind(&after).input("num", consume.output("result"));
    builder.build().unwrap()
}
