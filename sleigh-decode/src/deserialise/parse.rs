use sleigh_bytes::Endian;

use super::Error;

pub trait XmlExt {
    fn attribute_endian(&self, name: &'static str) -> Result<Endian, Error>;

    fn attribute_string(&self, name: &'static str) -> Result<String, Error>;

    fn attribute_string_opt(&self, name: &'static str, default: &str) -> String;

    fn attribute_int<T: FromStrRadix>(&self, name: &'static str) -> Result<T, Error>;

    fn attribute_int_opt<T: FromStrRadix>(
        &self,
        name: &'static str,
        default: T,
    ) -> Result<T, Error>;

    fn attribute_line_number<T: Default + FromStrRadix>(
        &self,
        name: &'static str,
    ) -> Result<(T, T), Error>;

    fn attribute_bool(&self, name: &'static str) -> Result<bool, Error>;

    fn attribute_bool_opt(&self, name: &'static str, default: bool) -> Result<bool, Error>;

    fn expect_tag(&self, name: &'static str) -> Result<(), Error>;
}

/// Parses `0x`-prefixed hexadecimal or decimal, with an optional sign.
pub fn parse_int_radix<T: FromStrRadix>(s: &str) -> Result<T, Error> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };

    let b = digits.as_bytes();
    let (digits, radix) = if b.len() > 2 && b[0] == b'0' && (b[1] == b'X' || b[1] == b'x') {
        (&digits[2..], 16)
    } else {
        (digits, 10)
    };

    if negative {
        T::from_str_base(&format!("-{}", digits), radix)
    } else {
        T::from_str_base(digits, radix)
    }
}

pub trait FromStrRadix: Sized {
    fn from_str_base(s: &str, radix: u32) -> Result<Self, Error>;
}

macro_rules! impl_from_str_radix {
    ($($t:ty),*) => {
        $(
            impl FromStrRadix for $t {
                fn from_str_base(s: &str, radix: u32) -> Result<Self, Error> {
                    Self::from_str_radix(s, radix).map_err(Error::ParseInteger)
                }
            }
        )*
    };
}

impl_from_str_radix! { i8, i16, i32, i64, isize, u8, u16, u32, u64, usize }

impl XmlExt for xml::Node<'_, '_> {
    fn attribute_endian(&self, name: &'static str) -> Result<Endian, Error> {
        let n = self
            .attribute(name)
            .ok_or(Error::AttributeExpected(name))?;
        match n {
            "big" | "BIG" | "be" | "BE" | "true" => Ok(Endian::Big),
            "little" | "LITTLE" | "le" | "LE" | "false" => Ok(Endian::Little),
            _ => Err(Error::ParseEndian),
        }
    }

    fn attribute_string(&self, name: &'static str) -> Result<String, Error> {
        self.attribute(name)
            .map(String::from)
            .ok_or(Error::AttributeExpected(name))
    }

    fn attribute_string_opt(&self, name: &'static str, default: &str) -> String {
        self.attribute(name)
            .map(String::from)
            .unwrap_or_else(|| default.to_owned())
    }

    fn attribute_int<T: FromStrRadix>(&self, name: &'static str) -> Result<T, Error> {
        let s = self
            .attribute(name)
            .ok_or(Error::AttributeExpected(name))?;
        parse_int_radix(s)
    }

    fn attribute_int_opt<T: FromStrRadix>(
        &self,
        name: &'static str,
        default: T,
    ) -> Result<T, Error> {
        if let Some(s) = self.attribute(name) {
            parse_int_radix(s)
        } else {
            Ok(default)
        }
    }

    fn attribute_line_number<T: Default + FromStrRadix>(
        &self,
        name: &'static str,
    ) -> Result<(T, T), Error> {
        let s = self
            .attribute(name)
            .ok_or(Error::AttributeExpected(name))?;

        // index:line, or a bare line in the first source file
        if let Some((index, line)) = s.split_once(':') {
            Ok((parse_int_radix(index)?, parse_int_radix(line)?))
        } else {
            Ok((T::default(), parse_int_radix(s)?))
        }
    }

    fn attribute_bool(&self, name: &'static str) -> Result<bool, Error> {
        self.attribute(name)
            .ok_or(Error::AttributeExpected(name))?
            .parse::<bool>()
            .map_err(Error::ParseBool)
    }

    fn attribute_bool_opt(&self, name: &'static str, default: bool) -> Result<bool, Error> {
        if let Some(s) = self.attribute(name) {
            s.parse::<bool>().map_err(Error::ParseBool)
        } else {
            Ok(default)
        }
    }

    fn expect_tag(&self, name: &'static str) -> Result<(), Error> {
        let tag = self.tag_name().name();
        if tag == name {
            Ok(())
        } else {
            Err(Error::TagUnexpected(tag.to_owned()))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn radix_forms() -> Result<(), Error> {
        assert_eq!(parse_int_radix::<u32>("0x1f")?, 31);
        assert_eq!(parse_int_radix::<u32>(" 42")?, 42);
        assert_eq!(parse_int_radix::<i64>("-0x10")?, -16);
        assert_eq!(parse_int_radix::<i64>("-7")?, -7);
        assert!(parse_int_radix::<u8>("0x").is_err());
        Ok(())
    }

    #[test]
    fn node_attributes() -> Result<(), Error> {
        let doc = xml::Document::parse(r#"<c line="2:17" big="true" n="0x10"/>"#)?;
        let node = doc.root_element();

        node.expect_tag("c")?;
        assert_eq!(node.attribute_line_number::<usize>("line")?, (2, 17));
        assert!(node.attribute_bool("big")?);
        assert!(!node.attribute_bool_opt("missing", false)?);
        assert_eq!(node.attribute_int::<usize>("n")?, 16);
        assert_eq!(node.attribute_endian("big")?, Endian::Big);
        assert!(matches!(
            node.attribute_int::<u8>("absent"),
            Err(Error::AttributeExpected("absent"))
        ));
        Ok(())
    }
}
