//! Exact evaluation of short arithmetic expressions typed into the chat.
//!
//! A query counts as arithmetic only when every character is a digit, an
//! operator (`+ - * / ^`), a parenthesis, a decimal point, whitespace, or one
//! of the multiplication/division stand-ins `x`, `X`, `÷`. Evaluation runs
//! over exact rationals, so `0.1 + 0.2` is `0.3` and `1/3 * 3` is `1`.
//! Anything that cannot be evaluated exactly (division by zero, overflow,
//! fractional exponents, malformed input) yields `None` and the router moves
//! on to its next rule.

use regex::Regex;
use std::sync::LazyLock;

static ARITHMETIC_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9+\-*/.()xX÷^ ]+$").expect("arithmetic character class is a valid regex")
});

const SIGNIFICANT_DIGITS: usize = 15;
const MAX_FRACTION_DIGITS: usize = 60;
const MAX_EXPONENT: u32 = 4096;
const MAX_DEPTH: usize = 64;

/// Whether `query` is made up solely of arithmetic characters.
pub fn looks_like_arithmetic(query: &str) -> bool {
    let trimmed = query.trim();
    !trimmed.is_empty() && ARITHMETIC_CHARS.is_match(trimmed)
}

/// Evaluates `query` and renders the value, or `None` if it is not a
/// well-formed, exactly computable expression.
pub fn try_evaluate(query: &str) -> Option<String> {
    if !looks_like_arithmetic(query) {
        return None;
    }
    let expression = query.trim().replace(['x', 'X'], "*").replace('÷', "/");
    let tokens = tokenize(&expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return None;
    }
    render(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rational {
    num: i128,
    den: i128,
}

impl Rational {
    fn new(num: i128, den: i128) -> Option<Self> {
        if den == 0 {
            return None;
        }
        let g = gcd(num, den);
        let (mut num, mut den) = (num / g, den / g);
        if den < 0 {
            num = num.checked_neg()?;
            den = den.checked_neg()?;
        }
        Some(Self { num, den })
    }

    fn integer(n: i128) -> Self {
        Self { num: n, den: 1 }
    }

    fn add(self, other: Self) -> Option<Self> {
        let num = self
            .num
            .checked_mul(other.den)?
            .checked_add(other.num.checked_mul(self.den)?)?;
        Self::new(num, self.den.checked_mul(other.den)?)
    }

    fn sub(self, other: Self) -> Option<Self> {
        self.add(other.neg()?)
    }

    fn mul(self, other: Self) -> Option<Self> {
        Self::new(
            self.num.checked_mul(other.num)?,
            self.den.checked_mul(other.den)?,
        )
    }

    fn div(self, other: Self) -> Option<Self> {
        Self::new(
            self.num.checked_mul(other.den)?,
            self.den.checked_mul(other.num)?,
        )
    }

    fn neg(self) -> Option<Self> {
        Some(Self {
            num: self.num.checked_neg()?,
            den: self.den,
        })
    }

    fn pow(self, exponent: Self) -> Option<Self> {
        if exponent.den != 1 {
            return None;
        }
        let magnitude = u32::try_from(exponent.num.unsigned_abs()).ok()?;
        if magnitude > MAX_EXPONENT {
            return None;
        }
        let raised = Self::new(
            self.num.checked_pow(magnitude)?,
            self.den.checked_pow(magnitude)?,
        )?;
        if exponent.num < 0 {
            Self::integer(1).div(raised)
        } else {
            Some(raised)
        }
    }
}

fn gcd(a: i128, b: i128) -> i128 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    // a <= |den| which fits in i128
    i128::try_from(a).unwrap_or(1).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(Rational),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Option<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' => {}
            '+' => tokens.push(Token::Plus),
            '-' => tokens.push(Token::Minus),
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Caret);
                i += 1;
            }
            '*' => tokens.push(Token::Star),
            '/' => tokens.push(Token::Slash),
            '^' => tokens.push(Token::Caret),
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '0'..='9' | '.' => {
                let start = i;
                while i + 1 < chars.len() && (chars[i + 1].is_ascii_digit() || chars[i + 1] == '.')
                {
                    i += 1;
                }
                let literal: String = chars[start..=i].iter().collect();
                tokens.push(Token::Num(parse_number(&literal)?));
            }
            _ => return None,
        }
        i += 1;
    }
    Some(tokens)
}

/// Parses `12`, `1.25`, `.5` or `5.` into an exact rational.
fn parse_number(literal: &str) -> Option<Rational> {
    let (whole, frac) = match literal.split_once('.') {
        Some((w, f)) => (w, f),
        None => (literal, ""),
    };
    if (whole.is_empty() && frac.is_empty()) || frac.contains('.') {
        return None;
    }
    let digits = format!("{}{}", whole, frac);
    let num: i128 = digits.parse().ok()?;
    let den = 10i128.checked_pow(u32::try_from(frac.len()).ok()?)?;
    Rational::new(num, den)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Option<Rational> {
        let mut value = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == Token::Plus {
                value.add(rhs)?
            } else {
                value.sub(rhs)?
            };
        }
        Some(value)
    }

    // term := unary (('*' | '/') unary)*
    fn term(&mut self) -> Option<Rational> {
        let mut value = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = if op == Token::Star {
                value.mul(rhs)?
            } else {
                value.div(rhs)?
            };
        }
        Some(value)
    }

    // unary := ('+' | '-') unary | power
    fn unary(&mut self) -> Option<Rational> {
        match self.peek()? {
            Token::Plus => {
                self.pos += 1;
                self.nested(Self::unary)
            }
            Token::Minus => {
                self.pos += 1;
                self.nested(Self::unary)?.neg()
            }
            _ => self.power(),
        }
    }

    // power := atom ('^' unary)?   (right associative, binds tighter than unary minus)
    fn power(&mut self) -> Option<Rational> {
        let base = self.atom()?;
        if self.peek() == Some(Token::Caret) {
            self.pos += 1;
            let exponent = self.nested(Self::unary)?;
            return base.pow(exponent);
        }
        Some(base)
    }

    fn atom(&mut self) -> Option<Rational> {
        match self.next()? {
            Token::Num(n) => Some(n),
            Token::LParen => {
                let value = self.nested(Self::expr)?;
                match self.next()? {
                    Token::RParen => Some(value),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn nested(&mut self, f: fn(&mut Self) -> Option<Rational>) -> Option<Rational> {
        if self.depth >= MAX_DEPTH {
            return None;
        }
        self.depth += 1;
        let value = f(self);
        self.depth -= 1;
        value
    }
}

/// Integers render as-is; other values as a decimal rounded to 15
/// significant digits with trailing zeros removed.
fn render(value: Rational) -> Option<String> {
    if value.den == 1 {
        return Some(value.num.to_string());
    }

    let negative = value.num < 0;
    let n = value.num.checked_abs()?;
    let d = value.den;
    let int_part = n / d;
    let mut rem = n % d;

    let mut digits: Vec<u8> = int_part.to_string().bytes().map(|b| b - b'0').collect();
    let mut point = digits.len();
    let mut significant = if int_part == 0 { 0 } else { digits.len() };
    let mut frac_len = 0;

    while rem != 0 && significant < SIGNIFICANT_DIGITS && frac_len < MAX_FRACTION_DIGITS {
        rem = rem.checked_mul(10)?;
        let digit = u8::try_from(rem / d).ok()?;
        rem %= d;
        digits.push(digit);
        frac_len += 1;
        if significant > 0 || digit != 0 {
            significant += 1;
        }
    }

    if rem != 0 && rem.checked_mul(10)? / d >= 5 {
        let mut i = digits.len();
        loop {
            if i == 0 {
                digits.insert(0, 1);
                point += 1;
                break;
            }
            i -= 1;
            if digits[i] == 9 {
                digits[i] = 0;
            } else {
                digits[i] += 1;
                break;
            }
        }
    }

    let to_str = |ds: &[u8]| ds.iter().map(|d| char::from(b'0' + d)).collect::<String>();
    let int_str = to_str(&digits[..point]);
    let frac_str = to_str(&digits[point..]);
    let frac_str = frac_str.trim_end_matches('0');

    let mut out = String::new();
    if negative && (!int_str.trim_start_matches('0').is_empty() || !frac_str.is_empty()) {
        out.push('-');
    }
    out.push_str(&int_str);
    if !frac_str.is_empty() {
        out.push('.');
        out.push_str(frac_str);
    }
    Some(out)
}
