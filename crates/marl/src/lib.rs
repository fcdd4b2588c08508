#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is the conversion matrix's job")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts follow the width rules")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior is part of the value model")]

mod ast;
mod engine;
mod error;
mod eval;
mod func;
mod io;
mod lex;
mod limits;
mod object;
mod parse;
mod resolve;
mod scope;
mod types;
mod value;

pub use crate::{
    engine::{Engine, HostFrame, RegisterTypeOptions},
    error::{CodeLoc, Diagnostic, EngineError, ErrorKind},
    func::{NativeHandler, ScriptFunc},
    io::{CollectSink, DiagnosticSink, StderrSink},
    lex::{Token, TokenKind},
    limits::{EngineLimits, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_PARSE_DEPTH},
    object::ArenaStats,
    types::{TypeId, TypeInfo, Visibility},
    value::ScriptRval,
};
