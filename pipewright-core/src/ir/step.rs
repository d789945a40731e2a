use serde_json::Value;

use crate::ir::VarType;

/// Value consumed by a step.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A variable requested by type; bound by the resolver.
    Var(VarType),
    /// A compile-time constant.
    Const(Value),
}

impl Operand {
    pub fn var(ty: impl Into<VarType>) -> Self {
        Self::Var(ty.into())
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Const(value.into())
    }

    pub fn requested_type(&self) -> Option<&VarType> {
        match self {
            Self::Var(ty) => Some(ty),
            Self::Const(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchStep {
    pub category: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Call {
        operation: String,
        args: Vec<Operand>,
    },
    Assign {
        value: Operand,
    },
    Conditional {
        condition: Operand,
        then_steps: Vec<Step>,
        else_steps: Vec<Step>,
    },
    Loop {
        items: VarType,
        item: VarType,
        body: Vec<Step>,
    },
    Try {
        body: Vec<Step>,
        catches: Vec<CatchStep>,
        finally: Vec<Step>,
    },
    Return {
        value: Option<Operand>,
    },
    /// Verbatim source. `{0}`, `{1}`, ... expand to the names of `inputs`,
    /// `{out}` to the name of the created variable.
    Raw {
        template: String,
        inputs: Vec<VarType>,
    },
}

/// One unit of generated logic, as contributed by an extension.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub kind: StepKind,
    pub creates: Option<VarType>,
    pub label: Option<String>,
}

impl Step {
    pub fn new(kind: StepKind) -> Self {
        Self {
            kind,
            creates: None,
            label: None,
        }
    }

    pub fn call(operation: impl Into<String>) -> Self {
        Self::new(StepKind::Call {
            operation: operation.into(),
            args: Vec::new(),
        })
    }

    pub fn assign(ty: impl Into<VarType>, value: Operand) -> Self {
        Self::new(StepKind::Assign { value }).creates(ty)
    }

    pub fn when(condition: Operand, then_steps: Vec<Step>, else_steps: Vec<Step>) -> Self {
        Self::new(StepKind::Conditional {
            condition,
            then_steps,
            else_steps,
        })
    }

    pub fn each(items: impl Into<VarType>, item: impl Into<VarType>, body: Vec<Step>) -> Self {
        Self::new(StepKind::Loop {
            items: items.into(),
            item: item.into(),
            body,
        })
    }

    pub fn attempt(body: Vec<Step>) -> Self {
        Self::new(StepKind::Try {
            body,
            catches: Vec::new(),
            finally: Vec::new(),
        })
    }

    pub fn ret(value: Option<Operand>) -> Self {
        Self::new(StepKind::Return { value })
    }

    pub fn raw(template: impl Into<String>) -> Self {
        Self::new(StepKind::Raw {
            template: template.into(),
            inputs: Vec::new(),
        })
    }

    /// Appends a call argument. No effect on other kinds.
    pub fn arg(mut self, operand: Operand) -> Self {
        if let StepKind::Call { args, .. } = &mut self.kind {
            args.push(operand);
        }
        self
    }

    pub fn var_arg(self, ty: impl Into<VarType>) -> Self {
        self.arg(Operand::var(ty))
    }

    pub fn const_arg(self, value: impl Into<Value>) -> Self {
        self.arg(Operand::constant(value))
    }

    /// Declares a raw-step input. No effect on other kinds.
    pub fn input(mut self, ty: impl Into<VarType>) -> Self {
        if let StepKind::Raw { inputs, .. } = &mut self.kind {
            inputs.push(ty.into());
        }
        self
    }

    /// Adds a catch clause to a try step. No effect on other kinds.
    pub fn catch(mut self, category: impl Into<String>, steps: Vec<Step>) -> Self {
        if let StepKind::Try { catches, .. } = &mut self.kind {
            catches.push(CatchStep {
                category: category.into(),
                steps,
            });
        }
        self
    }

    /// Sets the finally block of a try step. No effect on other kinds.
    pub fn finally(mut self, steps: Vec<Step>) -> Self {
        if let StepKind::Try { finally, .. } = &mut self.kind {
            *finally = steps;
        }
        self
    }

    pub fn creates(mut self, ty: impl Into<VarType>) -> Self {
        self.creates = Some(ty.into());
        self
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Short human-readable description used in diagnostics.
    pub fn describe(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        match &self.kind {
            StepKind::Call { operation, .. } => format!("call {operation}"),
            StepKind::Assign { .. } => match &self.creates {
                Some(ty) => format!("assign {ty}"),
                None => "assign".to_string(),
            },
            StepKind::Conditional { .. } => "if".to_string(),
            StepKind::Loop { items, .. } => format!("for each {items}"),
            StepKind::Try { .. } => "try".to_string(),
            StepKind::Return { .. } => "return".to_string(),
            StepKind::Raw { .. } => "raw".to_string(),
        }
    }
}
