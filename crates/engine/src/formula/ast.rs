use std::collections::BTreeSet;

use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Negative,
    Positive,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
    And,
    Or,
    Nullish,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Exp => "**",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Nullish => "??",
        }
    }
}

/// Parsed formula. Every node is side-effect free: there is no assignment,
/// no loop and no call target other than a builtin name.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Const(Value),
    Var(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Op1(UnaryOp, Box<Expr>),
    Op2(BinaryOp, Box<Expr>, Box<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    /// Builtin call; the name is already resolved against the allow-list.
    App(String, Vec<Expr>),
}

impl Expr {
    /// Names of the context variables this expression reads.
    pub fn references(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_references(&mut names);
        names
    }

    fn collect_references(&self, names: &mut BTreeSet<String>) {
        match self {
            Expr::Const(_) => {}
            Expr::Var(name) => {
                names.insert(name.clone());
            }
            Expr::Member(base, _) => {
                // `Math.PI` reads a constant, not a variable
                if !matches!(base.as_ref(), Expr::Var(name) if name == "Math") {
                    base.collect_references(names);
                }
            }
            Expr::Index(base, index) => {
                base.collect_references(names);
                index.collect_references(names);
            }
            Expr::Op1(_, operand) => operand.collect_references(names),
            Expr::Op2(_, l, r) => {
                l.collect_references(names);
                r.collect_references(names);
            }
            Expr::If(cond, t, f) => {
                cond.collect_references(names);
                t.collect_references(names);
                f.collect_references(names);
            }
            Expr::Array(items) | Expr::App(_, items) => {
                items.iter().for_each(|item| item.collect_references(names));
            }
            Expr::Object(entries) => {
                entries
                    .iter()
                    .for_each(|(_, item)| item.collect_references(names));
            }
        }
    }
}
