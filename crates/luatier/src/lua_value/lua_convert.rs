// Number <-> string conversions
// Formatting follows C's "%.14g"; parsing follows the Lua 5.1 numeral grammar

/// Format a number the way `tostring` and concatenation do ("%.14g").
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    // integral values with at most 14 digits print exactly
    if n == n.trunc() && n.abs() < 1e14 {
        if n == 0.0 && n.is_sign_negative() {
            return "-0".to_string();
        }
        let mut buf = itoa::Buffer::new();
        return buf.format(n as i64).to_string();
    }

    let sci = format!("{:.13e}", n);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    if !(-4..14).contains(&exp) {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
    } else {
        let precision = (13 - exp) as usize;
        trim_fraction(&format!("{:.*}", precision, n)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

fn is_lua_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0b' | '\x0c')
}

/// Convert a string to a number, or `None` when it is not a numeral.
///
/// Accepts surrounding whitespace, decimal numerals with optional fraction
/// and exponent, and hexadecimal integers (`0x1F`). `inf` and `nan` are
/// not numerals.
pub fn str_to_number(s: &str) -> Option<f64> {
    let t = s.trim_matches(is_lua_space);
    if t.is_empty() {
        return None;
    }

    let (negative, body) = match t.as_bytes()[0] {
        b'-' => (true, &t[1..]),
        b'+' => (false, &t[1..]),
        _ => (false, t),
    };
    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let mut value = 0f64;
        for b in hex.bytes() {
            value = value * 16.0 + (b as char).to_digit(16).unwrap_or(0) as f64;
        }
        return Some(if negative { -value } else { value });
    }

    if !t
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return None;
    }
    t.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_like_printf_g14() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(0.1), "0.1");
        assert_eq!(format_number(1.0 / 3.0), "0.33333333333333");
        assert_eq!(format_number(1e15), "1e+15");
        assert_eq!(format_number(1e100), "1e+100");
        assert_eq!(format_number(123456.789), "123456.789");
        assert_eq!(format_number(0.0001), "0.0001");
        assert_eq!(format_number(0.00001), "1e-05");
        assert_eq!(format_number(f64::INFINITY), "inf");
        assert_eq!(format_number(-f64::INFINITY), "-inf");
        assert_eq!(format_number(-0.0), "-0");
    }

    #[test]
    fn parses_lua_numerals() {
        assert_eq!(str_to_number("10"), Some(10.0));
        assert_eq!(str_to_number("  3.5  "), Some(3.5));
        assert_eq!(str_to_number("1e3"), Some(1000.0));
        assert_eq!(str_to_number(".5"), Some(0.5));
        assert_eq!(str_to_number("0x10"), Some(16.0));
        assert_eq!(str_to_number("-0xff"), Some(-255.0));
        assert_eq!(str_to_number(""), None);
        assert_eq!(str_to_number("abc"), None);
        assert_eq!(str_to_number("1e"), None);
        assert_eq!(str_to_number("inf"), None);
        assert_eq!(str_to_number("nan"), None);
        assert_eq!(str_to_number("0x"), None);
    }
}
