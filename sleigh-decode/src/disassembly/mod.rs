pub mod builder;
pub use builder::PcodeBuilder;

pub mod cache;
pub use cache::DisassemblyCache;

pub mod construct;
pub use construct::{ConstTpl, ConstructTpl, HandleTpl, OpTpl, VarnodeTpl};

pub mod context;
pub use context::{ContextBitRange, ContextCache, ContextDatabase};

pub mod decision;
pub use decision::{DecisionNode, DecisionProperties};

pub mod equation;
pub use equation::PatternEquation;

pub mod error;
pub use error::Error;

pub mod expression;
pub use expression::PatternExpression;

pub mod opcode;
pub use opcode::Opcode;

pub mod partmap;

pub mod pattern;
pub mod pattern_block;

pub mod symbol;
pub use symbol::{Constructor, ConstructorRef, Symbol, SymbolData, SymbolKind, SymbolTable};

pub mod token_pattern;
pub use token_pattern::{Token, TokenPattern};

pub mod varnodedata;
pub use varnodedata::{PcodeData, VarnodeData};

pub mod walker;
pub use walker::{FixedHandle, ParserContext, ParserState, ParserWalker, ParserWalkerChange};
