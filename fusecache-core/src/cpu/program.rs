use std::fmt::Display;

use super::CpuValue;

#[derive(PartialEq, Debug, Clone, Copy)]
pub enum BinaryOpType {
    Add,
    Div,
    Sub,
    Mul,
}

impl BinaryOpType {
    pub fn as_c_op(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Div => "/",
            Self::Sub => "-",
            Self::Mul => "*",
        }
    }

    fn apply(&self, x: f32, y: f32) -> f32 {
        match self {
            Self::Add => x + y,
            Self::Div => x / y,
            Self::Sub => x - y,
            Self::Mul => x * y,
        }
    }
}

#[derive(PartialEq, Debug, Clone, Copy)]
pub enum UnaryOpType {
    Neg,
    Sqrt,
    Exp,
}

impl UnaryOpType {
    pub fn fill_in_c_op(&self, val: impl Display) -> String {
        match self {
            Self::Neg => format!("-{val}"),
            Self::Sqrt => format!("sqrtf({val})"),
            Self::Exp => format!("expf({val})"),
        }
    }

    fn apply(&self, x: f32) -> f32 {
        match self {
            Self::Neg => -x,
            Self::Sqrt => x.sqrt(),
            Self::Exp => x.exp(),
        }
    }
}

/// Pointwise expression over the program's inputs.
#[derive(PartialEq, Debug, Clone)]
pub enum Expr {
    Input(usize),
    Const(f32),
    Unary {
        operator: UnaryOpType,
        v: Box<Expr>,
    },
    Binary {
        operator: BinaryOpType,
        l: Box<Expr>,
        r: Box<Expr>,
    },
}

impl Expr {
    pub fn input(i: usize) -> Self {
        Self::Input(i)
    }

    pub fn unary(operator: UnaryOpType, v: Expr) -> Self {
        Self::Unary {
            operator,
            v: Box::new(v),
        }
    }

    pub fn binary(operator: BinaryOpType, l: Expr, r: Expr) -> Self {
        Self::Binary {
            operator,
            l: Box::new(l),
            r: Box::new(r),
        }
    }

    pub fn add(self, rhs: Expr) -> Self {
        Self::binary(BinaryOpType::Add, self, rhs)
    }

    pub fn mul(self, rhs: Expr) -> Self {
        Self::binary(BinaryOpType::Mul, self, rhs)
    }

    /// Largest input index referenced, if any.
    pub fn max_input(&self) -> Option<usize> {
        match self {
            Self::Input(i) => Some(*i),
            Self::Const(_) => None,
            Self::Unary { v, .. } => v.max_input(),
            Self::Binary { l, r, .. } => l.max_input().max(r.max_input()),
        }
    }

    /// Value at flat element `i`. Inputs must already be arity checked.
    pub(crate) fn eval_at(&self, i: usize, inputs: &[CpuValue]) -> f32 {
        match self {
            Self::Input(idx) => match &inputs[*idx] {
                CpuValue::Tensor(t) => t.data[i],
                CpuValue::Scalar(v) => *v as f32,
            },
            Self::Const(v) => *v,
            Self::Unary { operator, v } => operator.apply(v.eval_at(i, inputs)),
            Self::Binary { operator, l, r } => {
                operator.apply(l.eval_at(i, inputs), r.eval_at(i, inputs))
            }
        }
    }

    /// C-like rendering, handy in logs.
    pub fn render(&self) -> String {
        match self {
            Self::Input(i) => format!("in{i}[i]"),
            Self::Const(v) => format!("{v:?}f"),
            Self::Unary { operator, v } => operator.fill_in_c_op(v.render()),
            Self::Binary { operator, l, r } => {
                format!("({} {} {})", l.render(), operator.as_c_op(), r.render())
            }
        }
    }
}

/// A pointwise kernel: `arity` inputs, one expression per output.
#[derive(PartialEq, Debug, Clone)]
pub struct CpuProgram {
    pub arity: usize,
    pub outputs: Vec<Expr>,
}

impl CpuProgram {
    pub fn new(arity: usize, outputs: Vec<Expr>) -> Self {
        Self { arity, outputs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_and_max_input() {
        let e = Expr::input(0)
            .mul(Expr::input(2))
            .add(Expr::unary(UnaryOpType::Neg, Expr::Const(1.0)));
        assert_eq!(e.max_input(), Some(2));
        assert_eq!(e.render(), "((in0[i] * in2[i]) + -1.0f)");
        assert_eq!(Expr::Const(3.0).max_input(), None);
    }
}
