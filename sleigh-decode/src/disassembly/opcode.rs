use std::fmt;
use std::str::FromStr;

macro_rules! opcodes {
    ($($variant:ident = $num:literal => $name:literal $(| $alias:literal)*),* $(,)?) => {
        /// P-code operations numbered as in the compiled specification
        /// format. The four builder directives occupy the slots of opcodes
        /// that never appear in constructor templates.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[derive(serde::Deserialize, serde::Serialize)]
        #[repr(u8)]
        pub enum Opcode {
            $($variant = $num),*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant),*];

            pub fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name),*
                }
            }

            pub fn from_number(num: u8) -> Option<Self> {
                match num {
                    $($num => Some(Self::$variant),)*
                    _ => None,
                }
            }
        }

        impl FromStr for Opcode {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name $(| $alias)* => Ok(Self::$variant),)*
                    _ => Err(()),
                }
            }
        }
    };
}

opcodes! {
    Copy = 1 => "COPY",
    Load = 2 => "LOAD",
    Store = 3 => "STORE",
    Branch = 4 => "BRANCH",
    CBranch = 5 => "CBRANCH",
    IBranch = 6 => "BRANCHIND",
    Call = 7 => "CALL",
    ICall = 8 => "CALLIND",
    CallOther = 9 => "CALLOTHER",
    Return = 10 => "RETURN",
    IntEq = 11 => "INT_EQUAL",
    IntNotEq = 12 => "INT_NOTEQUAL",
    IntSLess = 13 => "INT_SLESS",
    IntSLessEq = 14 => "INT_SLESSEQUAL",
    IntLess = 15 => "INT_LESS",
    IntLessEq = 16 => "INT_LESSEQUAL",
    IntZExt = 17 => "INT_ZEXT",
    IntSExt = 18 => "INT_SEXT",
    IntAdd = 19 => "INT_ADD",
    IntSub = 20 => "INT_SUB",
    IntCarry = 21 => "INT_CARRY",
    IntSCarry = 22 => "INT_SCARRY",
    IntSBorrow = 23 => "INT_SBORROW",
    IntNeg = 24 => "INT_2COMP",
    IntNot = 25 => "INT_NEGATE",
    IntXor = 26 => "INT_XOR",
    IntAnd = 27 => "INT_AND",
    IntOr = 28 => "INT_OR",
    IntLShift = 29 => "INT_LEFT",
    IntRShift = 30 => "INT_RIGHT",
    IntSRShift = 31 => "INT_SRIGHT",
    IntMul = 32 => "INT_MULT",
    IntDiv = 33 => "INT_DIV",
    IntSDiv = 34 => "INT_SDIV",
    IntRem = 35 => "INT_REM",
    IntSRem = 36 => "INT_SREM",
    BoolNot = 37 => "BOOL_NEGATE",
    BoolXor = 38 => "BOOL_XOR",
    BoolAnd = 39 => "BOOL_AND",
    BoolOr = 40 => "BOOL_OR",
    FloatEq = 41 => "FLOAT_EQUAL",
    FloatNotEq = 42 => "FLOAT_NOTEQUAL",
    FloatLess = 43 => "FLOAT_LESS",
    FloatLessEq = 44 => "FLOAT_LESSEQUAL",
    FloatIsNaN = 46 => "FLOAT_NAN",
    FloatAdd = 47 => "FLOAT_ADD",
    FloatDiv = 48 => "FLOAT_DIV",
    FloatMul = 49 => "FLOAT_MULT",
    FloatSub = 50 => "FLOAT_SUB",
    FloatNeg = 51 => "FLOAT_NEG",
    FloatAbs = 52 => "FLOAT_ABS",
    FloatSqrt = 53 => "FLOAT_SQRT",
    FloatOfInt = 54 => "INT2FLOAT",
    FloatOfFloat = 55 => "FLOAT2FLOAT",
    FloatTruncate = 56 => "TRUNC",
    FloatCeiling = 57 => "CEIL",
    FloatFloor = 58 => "FLOOR",
    FloatRound = 59 => "ROUND",
    Build = 60 => "MULTIEQUAL" | "BUILD",
    DelaySlot = 61 => "INDIRECT" | "DELAY_SLOT",
    Piece = 62 => "PIECE",
    Subpiece = 63 => "SUBPIECE",
    Cast = 64 => "CAST",
    Label = 65 => "PTRADD" | "LABELBUILD",
    CrossBuild = 66 => "PTRSUB" | "CROSSBUILD",
    SegmentOp = 67 => "SEGMENTOP",
    CPoolRef = 68 => "CPOOLREF",
    New = 69 => "NEW",
    Insert = 70 => "INSERT",
    Extract = 71 => "EXTRACT",
    PopCount = 72 => "POPCOUNT",
    LZCount = 73 => "LZCOUNT",
}

impl Opcode {
    /// Builder directives are consumed while instantiating templates and
    /// never reach the emitted p-code.
    pub fn is_directive(&self) -> bool {
        matches!(
            self,
            Self::Build | Self::DelaySlot | Self::Label | Self::CrossBuild
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn persisted_names() {
        assert_eq!("COPY".parse::<Opcode>(), Ok(Opcode::Copy));
        assert_eq!("MULTIEQUAL".parse::<Opcode>(), Ok(Opcode::Build));
        assert_eq!("LABELBUILD".parse::<Opcode>(), Ok(Opcode::Label));
        assert_eq!(Opcode::CrossBuild.name(), "PTRSUB");
        assert!("BOGUS".parse::<Opcode>().is_err());
    }

    #[test]
    fn numbering() {
        assert_eq!(Opcode::LZCount as u8, 73);
        assert_eq!(Opcode::from_number(45), None);
        assert_eq!(Opcode::from_number(19), Some(Opcode::IntAdd));
        assert!(Opcode::ALL.iter().all(|op| Opcode::from_number(*op as u8) == Some(*op)));
        assert!(Opcode::DelaySlot.is_directive() && !Opcode::Copy.is_directive());
    }
}
