pub mod scanner;
pub mod validator;

pub use scanner::{scan, tokenize, QualifiedRef, QueryScan, TableRef, Token, TokenKind};
pub use validator::{
    IntrospectionReport, QueryValidator, SchemaValidation, TableSubstitution,
};
