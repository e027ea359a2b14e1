use serde_json::{Map, Value};

/// Result code carried in the `err` field of every command result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum Code {
    Success = 0,
    NotImplemented = 1,
    UnknownCmd = 2,
    MissingField = 3,
    InvalidOperation = 4,
    DatabaseError = 5,
    AuthorizationRequired = 6,
}

impl From<Code> for Value {
    fn from(code: Code) -> Self {
        Value::from(code as i64)
    }
}

/// One command's result object: `{"err": <code>, ...fields}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    code: Code,
    fields: Map<String, Value>,
}

impl Reply {
    pub fn ok() -> Self {
        Self::with_code(Code::Success)
    }

    pub fn with_code(code: Code) -> Self {
        Self {
            code,
            fields: Map::new(),
        }
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn into_value(self) -> Value {
        let mut obj = Map::with_capacity(self.fields.len() + 1);
        obj.insert("err".to_string(), self.code.into());
        obj.extend(self.fields);
        Value::Object(obj)
    }
}
