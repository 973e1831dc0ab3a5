//! Builtin procedures provided by the runtime.
//!
//! Each builtin is a pre-tagged closure object living at a fixed link-time
//! label. The compiler only needs its name, label and signature.

use super::types::{BaseType, Type};

pub struct Native {
    pub name: &'static str,
    /// Link-time label of the closure object, without the `_closure` suffix.
    pub symbol: &'static str,
    pub params: &'static [BaseType],
    pub rest: Option<BaseType>,
    pub ret: BaseType,
}

impl Native {
    pub fn closure_label(&self) -> String {
        format!("__{}_closure", self.symbol)
    }

    pub fn ty(&self) -> Type {
        Type::function(
            self.params.iter().map(|&p| Type::Base(p)).collect(),
            self.rest.map(Type::Base),
            Type::Base(self.ret),
        )
    }
}

const NUMBER_PAIR: &[BaseType] = &[BaseType::Number, BaseType::Number];

pub static NATIVES: &[Native] = &[
    Native {
        name: "+",
        symbol: "plus",
        params: &[],
        rest: Some(BaseType::Number),
        ret: BaseType::Number,
    },
    Native {
        name: "-",
        symbol: "minus",
        params: &[],
        rest: Some(BaseType::Number),
        ret: BaseType::Number,
    },
    Native {
        name: "*",
        symbol: "times",
        params: &[],
        rest: Some(BaseType::Number),
        ret: BaseType::Number,
    },
    Native {
        name: "=",
        symbol: "eq",
        params: &[BaseType::Any],
        rest: Some(BaseType::Any),
        ret: BaseType::Boolean,
    },
    Native {
        name: "<",
        symbol: "lt",
        params: NUMBER_PAIR,
        rest: None,
        ret: BaseType::Boolean,
    },
    Native {
        name: ">",
        symbol: "gt",
        params: NUMBER_PAIR,
        rest: None,
        ret: BaseType::Boolean,
    },
    Native {
        name: "mod",
        symbol: "mod",
        params: NUMBER_PAIR,
        rest: None,
        ret: BaseType::Number,
    },
    Native {
        name: "not",
        symbol: "not",
        params: &[BaseType::Any],
        rest: None,
        ret: BaseType::Boolean,
    },
    Native {
        name: "and",
        symbol: "and",
        params: &[],
        rest: Some(BaseType::Any),
        ret: BaseType::Any,
    },
    Native {
        name: "or",
        symbol: "or",
        params: &[],
        rest: Some(BaseType::Any),
        ret: BaseType::Any,
    },
    Native {
        name: "print",
        symbol: "print",
        params: &[],
        rest: Some(BaseType::Any),
        ret: BaseType::Nil,
    },
    Native {
        name: "list",
        symbol: "list",
        params: &[],
        rest: Some(BaseType::Any),
        ret: BaseType::List,
    },
    Native {
        name: "cons",
        symbol: "cons",
        params: &[BaseType::Any, BaseType::List],
        rest: None,
        ret: BaseType::List,
    },
    Native {
        name: "peek",
        symbol: "peek",
        params: &[BaseType::List],
        rest: None,
        ret: BaseType::Any,
    },
    Native {
        name: "pop",
        symbol: "pop",
        params: &[BaseType::List],
        rest: None,
        ret: BaseType::List,
    },
    Native {
        name: "nth",
        symbol: "nth",
        params: &[BaseType::List, BaseType::Number],
        rest: None,
        ret: BaseType::Any,
    },
    Native {
        name: "count",
        symbol: "count",
        params: &[BaseType::List],
        rest: None,
        ret: BaseType::Number,
    },
];
