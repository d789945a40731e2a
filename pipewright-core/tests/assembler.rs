use std::sync::Arc;

use pipewright_core::{
    BuildContext, BuildError, ConstantSource, ContextFieldSource, FnSource, Operand, PipelineAssembler, PipelineMode,
    Registry, RegistryBuilder, ShapeDescriptor, Stage, Step, StepBuilder,
};

type ContributeFn = dyn Fn(&mut BuildContext<'_>) -> Result<(), BuildError> + Send + Sync;

struct FnBuilder {
    name: &'static str,
    stage: Stage,
    nested: bool,
    f: Box<ContributeFn>,
}

impl FnBuilder {
    fn new<F>(name: &'static str, stage: Stage, f: F) -> Self
    where
        F: Fn(&mut BuildContext<'_>) -> Result<(), BuildError> + Send + Sync + 'static,
    {
        Self {
            name,
            stage,
            nested: false,
            f: Box::new(f),
        }
    }

    fn steps(name: &'static str, stage: Stage, steps: Vec<Step>) -> Self {
        Self::new(name, stage, move |ctx| {
            for s in &steps {
                ctx.append_step(s.clone())?;
            }
            Ok(())
        })
    }

    fn nested(mut self) -> Self {
        self.nested = true;
        self
    }
}

impl StepBuilder for FnBuilder {
    fn name(&self) -> &str {
        self.name
    }

    fn stage(&self) -> Stage {
        self.stage
    }

    fn matches(&self, _shape: &ShapeDescriptor) -> bool {
        true
    }

    fn supports_nested_execution(&self) -> bool {
        self.nested
    }

    fn contribute(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        (self.f)(ctx)
    }
}

fn users_shape() -> ShapeDescriptor {
    ShapeDescriptor::new("users")
        .parameter("request", "Request")
        .returns("Result")
}

fn load_user_registry() -> Arc<Registry> {
    let mut rb = RegistryBuilder::new();
    // registered out of stage order on purpose
    rb.add_builder(FnBuilder::steps(
        "audit",
        Stage::Persistence,
        vec![Step::call("write_audit").var_arg("Result")],
    ))
    .unwrap();
    rb.add_builder(FnBuilder::steps(
        "load",
        Stage::Binding,
        vec![Step::call("load_user").var_arg("UserId").creates("User")],
    ))
    .unwrap();
    rb.add_builder(FnBuilder::steps(
        "log_start",
        Stage::Authorization,
        vec![Step::call("log_start").var_arg("User")],
    ))
    .unwrap();
    rb.add_builder(FnBuilder::steps(
        "execute",
        Stage::Execution,
        vec![Step::call("execute").var_arg("User").creates("Result")],
    ))
    .unwrap();
    rb.add_source(ContextFieldSource::new("user-id", "UserId", "Request", "user_id"))
        .unwrap();
    rb.build()
}

#[test]
fn load_user_pipeline_emits_in_dependency_order() {
    let assembler = PipelineAssembler::new(load_user_registry());
    let module = assembler.generate(&users_shape(), PipelineMode::TopLevel).unwrap();

    let expected = r#"// users (top-level)
// contributors: load, log_start, execute, audit
module pipeline_users {
  routine handle(request: Request) -> Result {
    let user_id: UserId = call value.get(request, "user_id");
    let user: User = call load_user(user_id);
    call log_start(user);
    let result: Result = call execute(user);
    call write_audit(result);
    return result;
  }
}
"#;
    assert_eq!(module.source, expected);
    assert_eq!(module.module_name, "pipeline_users");
    assert_eq!(module.method_name, "handle");
}

#[test]
fn generation_is_deterministic_across_registries() {
    let a = PipelineAssembler::new(load_user_registry())
        .generate(&users_shape(), PipelineMode::TopLevel)
        .unwrap();
    let b = PipelineAssembler::new(load_user_registry())
        .generate(&users_shape(), PipelineMode::TopLevel)
        .unwrap();
    assert_eq!(a.source, b.source);
    assert_eq!(a.content_hash, b.content_hash);
}

#[test]
fn producer_is_inserted_once_for_several_consumers() {
    let mut rb = RegistryBuilder::new();
    rb.add_builder(FnBuilder::steps(
        "consumers",
        Stage::Execution,
        vec![
            Step::call("first").var_arg("UserId"),
            Step::call("second").var_arg("UserId"),
        ],
    ))
    .unwrap();
    rb.add_source(ContextFieldSource::new("user-id", "UserId", "Request", "user_id"))
        .unwrap();
    let mut shape = users_shape();
    shape.returns = None;
    let module = PipelineAssembler::new(rb.build())
        .generate(&shape, PipelineMode::TopLevel)
        .unwrap();

    assert_eq!(module.source.matches("value.get").count(), 1);
    let producer = module.source.find("value.get").unwrap();
    let first = module.source.find("call first").unwrap();
    assert!(producer < first);
}

#[test]
fn two_producers_in_one_scope_are_a_duplicate() {
    let mut rb = RegistryBuilder::new();
    rb.add_builder(FnBuilder::steps(
        "a",
        Stage::Binding,
        vec![Step::call("load_a").creates("User")],
    ))
    .unwrap();
    rb.add_builder(FnBuilder::steps(
        "b",
        Stage::Binding,
        vec![Step::call("load_b").creates("User")],
    ))
    .unwrap();
    rb.add_builder(FnBuilder::steps(
        "use",
        Stage::Execution,
        vec![Step::call("use").var_arg("User")],
    ))
    .unwrap();

    let err = PipelineAssembler::new(rb.build())
        .generate(&ShapeDescriptor::new("dup"), PipelineMode::TopLevel)
        .unwrap_err();
    match err {
        BuildError::DuplicateProvider { requested, candidates } => {
            assert_eq!(requested.as_str(), "User");
            assert_eq!(candidates, vec!["call load_a [a]", "call load_b [b]"]);
        }
        other => panic!("expected DuplicateProvider, got {other:?}"),
    }
}

#[test]
fn sources_with_equal_priority_are_a_duplicate_but_priority_breaks_ties() {
    let consumer = || FnBuilder::steps("use", Stage::Execution, vec![Step::call("use").var_arg("Tenant")]);

    let mut rb = RegistryBuilder::new();
    rb.add_builder(consumer()).unwrap();
    rb.add_source(ConstantSource::new("one", "Tenant", "acme".into())).unwrap();
    rb.add_source(ConstantSource::new("two", "Tenant", "globex".into())).unwrap();
    let err = PipelineAssembler::new(rb.build())
        .generate(&ShapeDescriptor::new("t"), PipelineMode::TopLevel)
        .unwrap_err();
    assert!(matches!(err, BuildError::DuplicateProvider { .. }), "{err:?}");

    let mut rb = RegistryBuilder::new();
    rb.add_builder(consumer()).unwrap();
    rb.add_source(ConstantSource::new("one", "Tenant", "acme".into())).unwrap();
    rb.add_source(
        FnSource::new("preferred", |ty, _| {
            (ty.as_str() == "Tenant").then(|| Step::assign("Tenant", Operand::constant("initech")))
        })
        .with_priority(5),
    )
    .unwrap();
    let module = PipelineAssembler::new(rb.build())
        .generate(&ShapeDescriptor::new("t"), PipelineMode::TopLevel)
        .unwrap();
    assert!(module.source.contains(r#"let tenant: Tenant = "initech";"#), "{}", module.source);
}

#[test]
fn mutually_dependent_sources_are_a_cycle() {
    let mut rb = RegistryBuilder::new();
    rb.add_builder(FnBuilder::steps("use", Stage::Execution, vec![Step::call("use").var_arg("A")]))
        .unwrap();
    rb.add_source(FnSource::new("make-a", |ty, _| {
        (ty.as_str() == "A").then(|| Step::call("make_a").var_arg("B").creates("A"))
    }))
    .unwrap();
    rb.add_source(FnSource::new("make-b", |ty, _| {
        (ty.as_str() == "B").then(|| Step::call("make_b").var_arg("A").creates("B"))
    }))
    .unwrap();

    let err = PipelineAssembler::new(rb.build())
        .generate(&ShapeDescriptor::new("cycle"), PipelineMode::TopLevel)
        .unwrap_err();
    assert_eq!(
        err,
        BuildError::CyclicDependency {
            chain: vec!["A".into(), "B".into(), "A".into()]
        }
    );
}

#[test]
fn mutually_dependent_steps_are_a_cycle() {
    let mut rb = RegistryBuilder::new();
    rb.add_builder(FnBuilder::steps(
        "b",
        Stage::Execution,
        vec![
            Step::call("a").var_arg("B").creates("A"),
            Step::call("b").var_arg("A").creates("B"),
        ],
    ))
    .unwrap();
    let err = PipelineAssembler::new(rb.build())
        .generate(&ShapeDescriptor::new("cycle"), PipelineMode::TopLevel)
        .unwrap_err();
    assert_eq!(
        err,
        BuildError::CyclicDependency {
            chain: vec!["call a [b]".into(), "call b [b]".into(), "call a [b]".into()]
        }
    );
}

#[test]
fn unresolvable_type_is_a_missing_dependency() {
    let mut rb = RegistryBuilder::new();
    rb.add_builder(FnBuilder::steps(
        "b",
        Stage::Execution,
        vec![Step::call("use").var_arg("Unknown")],
    ))
    .unwrap();
    let err = PipelineAssembler::new(rb.build())
        .generate(&ShapeDescriptor::new("missing"), PipelineMode::TopLevel)
        .unwrap_err();
    assert_eq!(
        err,
        BuildError::MissingDependency {
            requested: "Unknown".into(),
            step: "call use [b]".into(),
        }
    );
}

#[test]
fn handlers_are_ordered_most_specific_first() {
    let mut rb = RegistryBuilder::new();
    rb.add_failure("BaseError", None).unwrap();
    rb.add_failure("SpecificError", Some("BaseError")).unwrap();
    rb.add_builder(FnBuilder::new("handlers", Stage::Setup, |ctx| {
        ctx.register_failure_handler("BaseError", |h| vec![Step::call("on_base").arg(h.fault())])?;
        ctx.register_failure_handler("SpecificError", |h| vec![Step::call("on_specific").arg(h.fault())])?;
        ctx.register_finally_step(Step::call("finish_span"));
        Ok(())
    }))
    .unwrap();
    rb.add_builder(FnBuilder::steps(
        "execute",
        Stage::Execution,
        vec![Step::call("execute").var_arg("Request").creates("Result")],
    ))
    .unwrap();

    let module = PipelineAssembler::new(rb.build())
        .generate(&users_shape(), PipelineMode::TopLevel)
        .unwrap();
    let expected = r#"// users (top-level)
// contributors: handlers, execute
module pipeline_users {
  failure BaseError;
  failure SpecificError : BaseError;
  routine handle(request: Request) -> Result {
    try {
      let result: Result = call execute(request);
      return result;
    } catch SpecificError as fault {
      call on_specific(fault);
    } catch BaseError as fault_2 {
      call on_base(fault_2);
    } finally {
      call finish_span();
    }
  }
}
"#;
    assert_eq!(module.source, expected);
}

#[test]
fn handler_dependencies_land_in_the_prologue() {
    let mut rb = RegistryBuilder::new();
    rb.add_failure("NotFound", None).unwrap();
    rb.add_builder(FnBuilder::new("notify", Stage::Setup, |ctx| {
        ctx.register_failure_handler("NotFound", |h| {
            vec![Step::call("notify").var_arg("Tenant").arg(h.fault())]
        })
    }))
    .unwrap();
    rb.add_builder(FnBuilder::steps("work", Stage::Execution, vec![Step::call("work")]))
        .unwrap();
    rb.add_source(ConstantSource::new("tenant", "Tenant", "acme".into())).unwrap();

    let module = PipelineAssembler::new(rb.build())
        .generate(&ShapeDescriptor::new("n"), PipelineMode::TopLevel)
        .unwrap();
    let tenant = module.source.find(r#"let tenant: Tenant = "acme";"#).unwrap();
    let try_at = module.source.find("try {").unwrap();
    assert!(tenant < try_at, "{}", module.source);
    assert!(module.source.contains("call notify(tenant, fault);"));
}

#[test]
fn contributed_return_in_the_body_is_rejected() {
    let mut rb = RegistryBuilder::new();
    rb.add_builder(FnBuilder::steps(
        "early",
        Stage::Execution,
        vec![Step::ret(Some(Operand::constant(1)))],
    ))
    .unwrap();
    let err = PipelineAssembler::new(rb.build())
        .generate(&ShapeDescriptor::new("r"), PipelineMode::TopLevel)
        .unwrap_err();
    assert_eq!(err, BuildError::DuplicateReturn { step: "return".into() });
}

#[test]
fn invalid_type_identifiers_are_rejected() {
    let mut rb = RegistryBuilder::new();
    rb.add_builder(FnBuilder::steps(
        "bad",
        Stage::Execution,
        vec![Step::call("load").creates("Vec<User>")],
    ))
    .unwrap();
    let err = PipelineAssembler::new(rb.build())
        .generate(&ShapeDescriptor::new("bad"), PipelineMode::TopLevel)
        .unwrap_err();
    assert!(matches!(err, BuildError::InvalidStep { .. }), "{err:?}");
}

#[test]
fn nested_mode_only_runs_opted_in_builders() {
    let mut rb = RegistryBuilder::new();
    rb.add_builder(FnBuilder::steps("outer_only", Stage::Setup, vec![Step::call("open_span")]))
        .unwrap();
    rb.add_builder(FnBuilder::steps("both", Stage::Execution, vec![Step::call("work")]).nested())
        .unwrap();
    let assembler = PipelineAssembler::new(rb.build());
    let shape = ShapeDescriptor::new("jobs");

    let top = assembler.generate(&shape, PipelineMode::TopLevel).unwrap();
    let nested = assembler.generate(&shape, PipelineMode::Nested).unwrap();
    assert!(top.source.contains("call open_span();"));
    assert!(!nested.source.contains("open_span"));
    assert!(nested.source.contains("call work();"));
    assert_eq!(nested.module_name, "pipeline_jobs_nested");
    assert_ne!(top.content_hash, nested.content_hash);
}

#[test]
fn block_steps_lift_dependencies_to_the_enclosing_frame() {
    let mut rb = RegistryBuilder::new();
    rb.add_builder(FnBuilder::steps(
        "loop",
        Stage::Execution,
        vec![Step::each(
            "Orders",
            "Order",
            vec![Step::call("ship").var_arg("Order").var_arg("Carrier")],
        )],
    ))
    .unwrap();
    rb.add_builder(FnBuilder::steps(
        "carrier",
        Stage::Completion,
        vec![Step::call("pick_carrier").creates("Carrier")],
    ))
    .unwrap();
    let shape = ShapeDescriptor::new("ship").parameter("orders", "Orders");
    let module = PipelineAssembler::new(rb.build())
        .generate(&shape, PipelineMode::TopLevel)
        .unwrap();

    let expected_body = r#"    let carrier: Carrier = call pick_carrier();
    for order: Order in orders {
      call ship(order, carrier);
    }
"#;
    assert!(module.source.contains(expected_body), "{}", module.source);
}

#[test]
fn request_variable_resolves_even_when_unused() {
    let mut rb = RegistryBuilder::new();
    rb.add_builder(FnBuilder::new("req", Stage::Setup, |ctx| {
        let _ = ctx.request_variable("Tenant");
        Ok(())
    }))
    .unwrap();
    let registry = rb.build();
    let err = PipelineAssembler::new(registry)
        .generate(&ShapeDescriptor::new("r"), PipelineMode::TopLevel)
        .unwrap_err();
    assert!(matches!(err, BuildError::MissingDependency { .. }));
}

#[test]
fn frame_graph_exports_dot() {
    let assembler = PipelineAssembler::new(load_user_registry());
    let method = assembler.assemble(&users_shape(), PipelineMode::TopLevel).unwrap();
    let dot = method.to_dot();
    assert!(dot.starts_with("digraph pipeline {"));
    assert!(dot.contains("label=\"pipeline_users\""));
    assert!(dot.contains("call load_user"));
    assert!(dot.contains("->"));
}
