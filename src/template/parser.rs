//! Parsing of `${...}` interpolations into a small expression tree.

/// A piece of template text.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
	Literal(String),
	Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
	Ident(String),
	Str(String),
	Int(i64),
	Float(f64),
	Bool(bool),
	Null,
	Member(Box<Expr>, String),
	Call(Box<Expr>, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
	Ident(String),
	Str(String),
	Int(i64),
	Float(f64),
	Dot,
	Comma,
	LParen,
	RParen,
}

/// Split template text into literal runs and parsed expressions.
///
/// `$${` produces a literal `${`.
pub(crate) fn parse(text: &str) -> Result<Vec<Segment>, String> {
	let mut segments = Vec::new();
	let mut literal = String::new();
	let mut rest = text;

	while let Some(pos) = rest.find("${") {
		if rest[..pos].ends_with('$') {
			literal.push_str(&rest[..pos - 1]);
			literal.push_str("${");
			rest = &rest[pos + 2..];
			continue;
		}

		literal.push_str(&rest[..pos]);
		let body_start = pos + 2;
		let body_len = find_closing_brace(&rest[body_start..])
			.ok_or_else(|| "unterminated interpolation".to_string())?;
		let source = &rest[body_start..body_start + body_len];

		if !literal.is_empty() {
			segments.push(Segment::Literal(std::mem::take(&mut literal)));
		}
		segments.push(Segment::Expr(parse_expr(source)?));
		rest = &rest[body_start + body_len + 1..];
	}

	literal.push_str(rest);
	if !literal.is_empty() {
		segments.push(Segment::Literal(literal));
	}

	Ok(segments)
}

/// Offset of the `}` that closes an interpolation, skipping quoted strings.
fn find_closing_brace(body: &str) -> Option<usize> {
	let mut quote: Option<char> = None;
	let mut escaped = false;

	for (i, c) in body.char_indices() {
		if let Some(q) = quote {
			if escaped {
				escaped = false;
			} else if c == '\\' {
				escaped = true;
			} else if c == q {
				quote = None;
			}
			continue;
		}
		match c {
			'\'' | '"' => quote = Some(c),
			'}' => return Some(i),
			_ => {}
		}
	}

	None
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
	let mut tokens = Vec::new();
	let chars: Vec<char> = source.chars().collect();
	let mut i = 0;

	while i < chars.len() {
		let c = chars[i];
		match c {
			c if c.is_whitespace() => i += 1,
			'.' => {
				tokens.push(Token::Dot);
				i += 1;
			}
			',' => {
				tokens.push(Token::Comma);
				i += 1;
			}
			'(' => {
				tokens.push(Token::LParen);
				i += 1;
			}
			')' => {
				tokens.push(Token::RParen);
				i += 1;
			}
			'\'' | '"' => {
				let (value, next) = read_string(&chars, i)?;
				tokens.push(Token::Str(value));
				i = next;
			}
			c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
				let start = i;
				i += 1;
				while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
					i += 1;
				}
				let text: String = chars[start..i].iter().collect();
				if text.contains('.') {
					let value = text.parse().map_err(|_| format!("invalid number {text:?}"))?;
					tokens.push(Token::Float(value));
				} else {
					let value = text.parse().map_err(|_| format!("invalid number {text:?}"))?;
					tokens.push(Token::Int(value));
				}
			}
			c if c.is_alphabetic() || c == '_' => {
				let start = i;
				while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
					i += 1;
				}
				tokens.push(Token::Ident(chars[start..i].iter().collect()));
			}
			other => return Err(format!("unexpected character {other:?}")),
		}
	}

	Ok(tokens)
}

/// Read a quoted string starting at `start`.
///
/// Only the quote characters and the backslash itself are escapes; any other
/// backslash sequence is kept verbatim so backreferences like `\1` survive.
fn read_string(chars: &[char], start: usize) -> Result<(String, usize), String> {
	let quote = chars[start];
	let mut value = String::new();
	let mut i = start + 1;

	while i < chars.len() {
		let c = chars[i];
		if c == '\\' {
			match chars.get(i + 1) {
				Some(&next) if next == '\\' || next == '\'' || next == '"' => {
					value.push(next);
					i += 2;
				}
				_ => {
					value.push(c);
					i += 1;
				}
			}
		} else if c == quote {
			return Ok((value, i + 1));
		} else {
			value.push(c);
			i += 1;
		}
	}

	Err("unterminated string literal".to_string())
}

struct Parser {
	tokens: Vec<Token>,
	pos: usize,
}

impl Parser {
	fn peek(&self) -> Option<&Token> {
		self.tokens.get(self.pos)
	}

	fn next(&mut self) -> Option<Token> {
		let token = self.tokens.get(self.pos).cloned();
		self.pos += 1;
		token
	}

	fn expr(&mut self) -> Result<Expr, String> {
		let mut expr = self.atom()?;
		loop {
			match self.peek() {
				Some(Token::Dot) => {
					self.pos += 1;
					match self.next() {
						Some(Token::Ident(name)) => expr = Expr::Member(Box::new(expr), name),
						other => return Err(format!("expected attribute name, found {other:?}")),
					}
				}
				Some(Token::LParen) => {
					self.pos += 1;
					let args = self.args()?;
					expr = Expr::Call(Box::new(expr), args);
				}
				_ => return Ok(expr),
			}
		}
	}

	fn args(&mut self) -> Result<Vec<Expr>, String> {
		let mut args = Vec::new();
		if self.peek() == Some(&Token::RParen) {
			self.pos += 1;
			return Ok(args);
		}
		loop {
			args.push(self.expr()?);
			match self.next() {
				Some(Token::Comma) => continue,
				Some(Token::RParen) => return Ok(args),
				other => return Err(format!("expected ',' or ')', found {other:?}")),
			}
		}
	}

	fn atom(&mut self) -> Result<Expr, String> {
		match self.next() {
			Some(Token::Ident(name)) => Ok(match name.as_str() {
				"true" => Expr::Bool(true),
				"false" => Expr::Bool(false),
				"null" => Expr::Null,
				_ => Expr::Ident(name),
			}),
			Some(Token::Str(value)) => Ok(Expr::Str(value)),
			Some(Token::Int(value)) => Ok(Expr::Int(value)),
			Some(Token::Float(value)) => Ok(Expr::Float(value)),
			Some(other) => Err(format!("unexpected token {other:?}")),
			None => Err("empty expression".to_string()),
		}
	}
}

fn parse_expr(source: &str) -> Result<Expr, String> {
	let mut parser = Parser {
		tokens: tokenize(source)?,
		pos: 0,
	};
	let expr = parser.expr()?;
	if let Some(extra) = parser.peek() {
		return Err(format!("unexpected token {extra:?}"));
	}
	Ok(expr)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ident(name: &str) -> Box<Expr> {
		Box::new(Expr::Ident(name.to_string()))
	}

	#[test]
	fn test_parse_plain_text() {
		let segments = parse("hello world").unwrap();
		assert_eq!(segments, vec![Segment::Literal("hello world".to_string())]);
		assert!(parse("").unwrap().is_empty());
	}

	#[test]
	fn test_parse_member_access() {
		let segments = parse("a ${var.foo} b").unwrap();
		assert_eq!(
			segments,
			vec![
				Segment::Literal("a ".to_string()),
				Segment::Expr(Expr::Member(ident("var"), "foo".to_string())),
				Segment::Literal(" b".to_string()),
			]
		);
	}

	#[test]
	fn test_parse_call_with_args() {
		let segments = parse(r#"${var("name", 1, 2.5, true, null)}"#).unwrap();
		assert_eq!(
			segments,
			vec![Segment::Expr(Expr::Call(
				ident("var"),
				vec![
					Expr::Str("name".to_string()),
					Expr::Int(1),
					Expr::Float(2.5),
					Expr::Bool(true),
					Expr::Null,
				]
			))]
		);
	}

	#[test]
	fn test_parse_brace_inside_string() {
		let segments = parse("${env('A}B')}").unwrap();
		assert_eq!(
			segments,
			vec![Segment::Expr(Expr::Call(ident("env"), vec![Expr::Str("A}B".to_string())]))]
		);
	}

	#[test]
	fn test_string_keeps_backreferences() {
		let segments = parse(r"${fg('\1')}").unwrap();
		assert_eq!(
			segments,
			vec![Segment::Expr(Expr::Call(ident("fg"), vec![Expr::Str(r"\1".to_string())]))]
		);
	}

	#[test]
	fn test_parse_escaped_interpolation() {
		let segments = parse("cost: $${var.a}").unwrap();
		assert_eq!(segments, vec![Segment::Literal("cost: ${var.a}".to_string())]);
	}

	#[test]
	fn test_parse_errors() {
		assert!(parse("${var.foo").is_err());
		assert!(parse("${}").is_err());
		assert!(parse("${foo bar}").is_err());
		assert!(parse("${f('x'}").is_err());
		assert!(parse("${'open}").is_err());
	}
}
