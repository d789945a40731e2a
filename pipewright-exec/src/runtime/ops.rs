use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use pipewright_core::manifest::{Manifest, OperationKind, SourceKind};
use serde_json::Value;

use crate::runtime::fault::Fault;
use crate::runtime::vm::truthy;

/// A named host operation invoked by `call` statements.
#[async_trait]
pub trait Operation: Send + Sync {
    async fn call(&self, args: Vec<Value>) -> Result<Value, Fault>;
}

/// Adapts a synchronous closure.
pub struct FnOperation<F> {
    f: F,
}

impl<F> FnOperation<F>
where
    F: Fn(Vec<Value>) -> Result<Value, Fault> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Operation for FnOperation<F>
where
    F: Fn(Vec<Value>) -> Result<Value, Fault> + Send + Sync,
{
    async fn call(&self, args: Vec<Value>) -> Result<Value, Fault> {
        (self.f)(args)
    }
}

/// Operations available for linking, keyed by dotted name.
#[derive(Clone, Default)]
pub struct OperationTable {
    ops: BTreeMap<String, Arc<dyn Operation>>,
}

impl std::fmt::Debug for OperationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationTable")
            .field("operations", &self.ops.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OperationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `value.get`, `value.eq` and `value.not`.
    pub fn with_builtins() -> Self {
        let mut t = Self::new();
        t.register("value.get", FnOperation::new(value_get));
        t.register("value.eq", FnOperation::new(|args| {
            let [a, b] = exact::<2>("value.eq", args)?;
            Ok(Value::Bool(a == b))
        }));
        t.register("value.not", FnOperation::new(|args| {
            let [a] = exact::<1>("value.not", args)?;
            Ok(Value::Bool(!truthy(&a)))
        }));
        t
    }

    pub fn register(&mut self, name: impl Into<String>, op: impl Operation + 'static) -> &mut Self {
        self.ops.insert(name.into(), Arc::new(op));
        self
    }

    pub fn register_shared(&mut self, name: impl Into<String>, op: Arc<dyn Operation>) -> &mut Self {
        self.ops.insert(name.into(), op);
        self
    }

    /// Registers `services.resolve` backed by `services`.
    pub fn with_services(mut self, services: ServiceRegistry) -> Self {
        self.register("services.resolve", services);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.ops.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ops.keys().map(String::as_str)
    }
}

fn exact<const N: usize>(op: &str, args: Vec<Value>) -> Result<[Value; N], Fault> {
    let got = args.len();
    args.try_into()
        .map_err(|_| Fault::invalid_arguments(format!("`{op}` takes {N} argument(s), got {got}")))
}

fn value_get(args: Vec<Value>) -> Result<Value, Fault> {
    let [target, field] = exact::<2>("value.get", args)?;
    let Value::String(field) = field else {
        return Err(Fault::type_mismatch("`value.get` field name must be a string"));
    };
    match target {
        Value::Object(mut map) => Ok(map.remove(&field).unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(Fault::type_mismatch(format!("cannot read `{field}` from {}", kind_of(&other)))),
    }
}

pub(crate) fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Named service instances handed out by `services.resolve`.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, Value>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, service: Value) -> &mut Self {
        self.services.insert(name.into(), service);
        self
    }
}

#[async_trait]
impl Operation for ServiceRegistry {
    async fn call(&self, args: Vec<Value>) -> Result<Value, Fault> {
        let [name] = exact::<1>("services.resolve", args)?;
        let Value::String(name) = name else {
            return Err(Fault::type_mismatch("service name must be a string"));
        };
        self.services
            .get(&name)
            .cloned()
            .ok_or_else(|| Fault::new(Fault::UNKNOWN_SERVICE, format!("no service named `{name}`")))
    }
}

struct StubOperation {
    kind: OperationKind,
}

#[async_trait]
impl Operation for StubOperation {
    async fn call(&self, args: Vec<Value>) -> Result<Value, Fault> {
        match &self.kind {
            OperationKind::Const { value } => Ok(value.clone()),
            OperationKind::Echo => Ok(args.into_iter().next().unwrap_or(Value::Null)),
            OperationKind::Fail { category, message } => {
                Err(Fault::new(category, message.clone()).with_data(Value::Array(args)))
            }
            OperationKind::Collect => Ok(Value::Array(args)),
        }
    }
}

/// Builtins, the manifest's stub operations and a service registry in which
/// every service source resolves to its own name.
pub fn manifest_operations(manifest: &Manifest) -> OperationTable {
    let mut services = ServiceRegistry::new();
    for s in &manifest.sources {
        if let SourceKind::Service { service } = &s.kind {
            services.register(service.clone(), Value::String(service.clone()));
        }
    }
    let mut table = OperationTable::with_builtins().with_services(services);
    for op in &manifest.operations {
        table.register(op.name.clone(), StubOperation { kind: op.kind.clone() });
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn builtins_behave() {
        let t = OperationTable::with_builtins();
        let get = t.get("value.get").unwrap();
        assert_eq!(get.call(vec![json!({"a": 1}), json!("a")]).await.unwrap(), json!(1));
        assert_eq!(get.call(vec![json!({}), json!("a")]).await.unwrap(), json!(null));
        let err = get.call(vec![json!(3), json!("a")]).await.unwrap_err();
        assert_eq!(err.category, Fault::TYPE_MISMATCH);
        let err = get.call(vec![json!(3)]).await.unwrap_err();
        assert_eq!(err.category, Fault::INVALID_ARGUMENTS);

        let not = t.get("value.not").unwrap();
        assert_eq!(not.call(vec![json!("")]).await.unwrap(), json!(true));
        let eq = t.get("value.eq").unwrap();
        assert_eq!(eq.call(vec![json!([1]), json!([1])]).await.unwrap(), json!(true));
    }

    #[tokio::test]
    async fn services_resolve_by_name() {
        let mut services = ServiceRegistry::new();
        services.register("clock", json!({"now": 0}));
        let t = OperationTable::new().with_services(services);
        let resolve = t.get("services.resolve").unwrap();
        assert_eq!(resolve.call(vec![json!("clock")]).await.unwrap(), json!({"now": 0}));
        let err = resolve.call(vec![json!("db")]).await.unwrap_err();
        assert_eq!(err.category, Fault::UNKNOWN_SERVICE);
    }
}
