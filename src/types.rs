use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    vec::IntoIter,
};
use thiserror::Error;

/// The semantic type of a parameter or return value.
///
/// Types are descriptive: arguments are decoded structurally with serde,
/// the type is what a procedure advertises and what error messages name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum Type {
    /// No value. As a return type this marks a void procedure.
    Nil,
    Bool,
    Int,
    Float,
    String,
    Array(Box<Type>),
    Object,
    Optional(Box<Type>),
    Any,
}

impl Type {
    fn name(&self) -> &'static str {
        use Type::*;
        match self {
            Nil => "Nil",
            Bool => "Bool",
            Int => "Int",
            Float => "Float",
            String => "String",
            Array(_) => "Array",
            Object => "Object",
            Optional(_) => "Optional",
            Any => "Any",
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Nil)
    }

    /// Whether `null` is an ordinary value of this type.
    pub fn admits_null(&self) -> bool {
        matches!(self, Type::Nil | Type::Optional(_) | Type::Any)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())?;
        if let Type::Array(inner) | Type::Optional(inner) = self {
            write!(f, "<{inner}>")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub typ: Type,
}

impl Param {
    pub fn new(name: impl Into<String>, typ: Type) -> Self {
        Self {
            name: name.into(),
            typ,
        }
    }
}

/// Ordered parameter shape plus return type of a procedure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Signature {
    pub params: Vec<Param>,
    pub returns: Type,
}

impl Signature {
    pub fn new(params: Vec<Param>, returns: Type) -> Self {
        Self { params, returns }
    }

    /// Builds a signature from the Rust types, naming parameters `arg0`, `arg1`, ...
    pub fn infer<Domain: Decode, Range: Encode>() -> Self {
        let params = Domain::param_types()
            .into_iter()
            .enumerate()
            .map(|(position, typ)| Param::new(format!("arg{position}"), typ))
            .collect();
        Self::new(params, Range::rpc_type())
    }

    /// Renames parameters in order. Extra names are ignored.
    pub fn with_param_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for (param, name) in self.params.iter_mut().zip(names) {
            param.name = name.into();
        }
        self
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

pub trait Typed {
    fn rpc_type() -> Type;
}

macro_rules! impl_typed {
    ($rpc_type:expr => $($rust_type:ty),+) => {
        $(
            impl Typed for $rust_type {
                fn rpc_type() -> Type {
                    $rpc_type
                }
            }
        )+
    };
}

impl_typed!(Type::Nil => ());
impl_typed!(Type::Bool => bool);
impl_typed!(Type::Int => i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);
impl_typed!(Type::Float => f32, f64);
impl_typed!(Type::String => String, char);
impl_typed!(Type::Any => Value);
impl_typed!(Type::Object => serde_json::Map<String, Value>);

impl<T: Typed> Typed for Vec<T> {
    fn rpc_type() -> Type {
        Type::Array(Box::new(T::rpc_type()))
    }
}

impl<T: Typed> Typed for Option<T> {
    fn rpc_type() -> Type {
        Type::Optional(Box::new(T::rpc_type()))
    }
}

impl<T: Typed> Typed for HashMap<String, T> {
    fn rpc_type() -> Type {
        Type::Object
    }
}

impl<T: Typed> Typed for BTreeMap<String, T> {
    fn rpc_type() -> Type {
        Type::Object
    }
}

/// A procedure's return value.
pub trait Encode {
    fn rpc_type() -> Type;
    fn encode(self) -> Result<Value, serde_json::Error>;
}

impl<T> Encode for T
where
    T: Serialize + Typed,
{
    fn rpc_type() -> Type {
        <T as Typed>::rpc_type()
    }

    fn encode(self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// A procedure's argument list: a tuple decoded position by position.
pub trait Decode: Sized {
    fn param_types() -> Vec<Type>;
    fn decode(args: Vec<Value>) -> Result<Self, TypeMismatch>;
}

impl Decode for () {
    fn param_types() -> Vec<Type> {
        Vec::new()
    }

    fn decode(args: Vec<Value>) -> Result<Self, TypeMismatch> {
        match args.len() {
            0 => Ok(()),
            received => Err(TypeMismatch::Arity {
                expected: 0,
                received,
            }),
        }
    }
}

struct Args {
    values: std::iter::Enumerate<IntoIter<Value>>,
    expected: usize,
    received: usize,
}

impl Args {
    fn new(values: Vec<Value>, expected: usize) -> Result<Self, TypeMismatch> {
        let received = values.len();
        if received != expected {
            return Err(TypeMismatch::Arity { expected, received });
        }
        Ok(Self {
            values: values.into_iter().enumerate(),
            expected,
            received,
        })
    }

    fn next<T: DeserializeOwned + Typed>(&mut self) -> Result<T, TypeMismatch> {
        let (position, value) = self.values.next().ok_or(TypeMismatch::Arity {
            expected: self.expected,
            received: self.received,
        })?;
        serde_json::from_value(value).map_err(|err| TypeMismatch::Value {
            position,
            expected: T::rpc_type(),
            reason: err.to_string(),
        })
    }
}

macro_rules! impl_decode_tuple {
    ($arity:expr; $($arg:ident),+) => {
        impl<$($arg),+> Decode for ($($arg,)+)
        where
            $($arg: DeserializeOwned + Typed),+
        {
            fn param_types() -> Vec<Type> {
                vec![$(<$arg as Typed>::rpc_type()),+]
            }

            fn decode(args: Vec<Value>) -> Result<Self, TypeMismatch> {
                let mut args = Args::new(args, $arity)?;
                Ok(($(args.next::<$arg>()?,)+))
            }
        }
    };
}

impl_decode_tuple!(1; A);
impl_decode_tuple!(2; A, B);
impl_decode_tuple!(3; A, B, C);
impl_decode_tuple!(4; A, B, C, D);
impl_decode_tuple!(5; A, B, C, D, E);
impl_decode_tuple!(6; A, B, C, D, E, F);

#[derive(Debug, Clone, Error)]
pub enum TypeMismatch {
    #[error("Expecting {expected} parameters, and received {received}")]
    Arity { expected: usize, received: usize },

    #[error("parameter {position} is not a valid {expected}: {reason}")]
    Value {
        position: usize,
        expected: Type,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Person {
        name: String,
    }

    crate::typed!(Person => Type::Object);

    #[test]
    fn test_decode_positional_tuple() {
        let (name, age): (String, i64) = Decode::decode(vec![json!("Ann"), json!(41)]).unwrap();
        assert_eq!(name, "Ann");
        assert_eq!(age, 41);
    }

    #[test]
    fn test_decode_reports_position_and_type() {
        let err = <(String, i64)>::decode(vec![json!("Ann"), json!("old")]).unwrap_err();
        match err {
            TypeMismatch::Value {
                position, expected, ..
            } => {
                assert_eq!(position, 1);
                assert_eq!(expected, Type::Int);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_arity() {
        let err = <(String,)>::decode(vec![]).unwrap_err();
        assert_eq!(err.to_string(), "Expecting 1 parameters, and received 0");
    }

    #[test]
    fn test_decode_keyed_structure() {
        let (person,): (Person,) = Decode::decode(vec![json!({"name": "Ann"})]).unwrap();
        assert_eq!(person.name, "Ann");
    }

    #[test]
    fn test_infer_signature() {
        let signature = Signature::infer::<(String, Vec<i32>), Option<f64>>()
            .with_param_names(["name"]);
        assert_eq!(signature.arity(), 2);
        assert_eq!(signature.params[0], Param::new("name", Type::String));
        assert_eq!(signature.params[1].name, "arg1");
        assert_eq!(signature.params[1].typ.to_string(), "Array<Int>");
        assert!(signature.returns.admits_null());
        assert!(Signature::infer::<(), ()>().returns.is_void());
    }
}
