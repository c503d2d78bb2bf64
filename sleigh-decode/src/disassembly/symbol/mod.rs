pub mod constructor;
pub mod scope;
pub mod subtable;
pub mod symbol;
pub mod table;

pub use constructor::{Constructor, ConstructorRef, ContextChange, PrintPiece};
pub use scope::SymbolScope;
pub use subtable::SubtableSymbol;
pub use symbol::{OperandSymbol, Symbol, SymbolData, SymbolKind};
pub use table::{OperandDefinition, SymbolTable, ROOT_TABLE};
