//! Precedence-climbing parser over lexer tokens
//!
//! Grammar (lowest to highest):
//! ```text
//! conditional := coalesce ("?" conditional ":" conditional)?
//! coalesce    := or ("??" or)*
//! or          := and ("||" and)*
//! and         := equality ("&&" equality)*
//! equality    := comparison (("==" | "!=") comparison)*
//! comparison  := additive (("<" | "<=" | ">" | ">=") additive)*
//! additive    := term (("+" | "-") term)*
//! term        := unary (("*" | "/" | "%") unary)*
//! unary       := ("!" | "-") unary | primary
//! primary     := literal | path | "{" path "}" | call | "(" conditional ")"
//! path        := ident ("->" ident)*
//! ```

use serde_json::Value;

use crate::error::{BindError, Result};
use crate::store::FieldId;

use super::ast::{json_number, BinaryOp, Builtin, Expr, UnaryOp};
use super::lexer::{tokenize, Spanned, Token};
use super::path::PathExpr;

/// Deepest expression tree the parser will build
///
/// Counts parentheses, placeholders, calls, ternaries, unary operators and
/// every link of a binary operator chain.
pub const MAX_NESTING: usize = 64;

/// Parse a complete expression
pub fn parse(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        cursor: 0,
        depth: 0,
    };

    if parser.tokens.is_empty() {
        return Err(parser.expression_error(0, "empty expression"));
    }

    let expr = parser.conditional()?;
    if let Some(extra) = parser.peek_spanned() {
        let (pos, found) = (extra.pos, extra.token.describe());
        return Err(parser.expression_error(pos, format!("unexpected {} after expression", found)));
    }
    Ok(expr)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Spanned>,
    cursor: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    // ═══════════════════════════════════════════
    // TOKEN CURSOR
    // ═══════════════════════════════════════════

    fn peek_spanned(&self) -> Option<&Spanned> {
        self.tokens.get(self.cursor)
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_spanned().map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.peek_spanned()
            .map(|s| s.pos)
            .unwrap_or(self.source.len())
    }

    fn advance(&mut self) -> Option<Spanned> {
        let spanned = self.tokens.get(self.cursor).cloned();
        if spanned.is_some() {
            self.cursor += 1;
        }
        spanned
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, context: &str) -> Result<()> {
        if self.eat(&token) {
            return Ok(());
        }
        let found = self
            .peek()
            .map(Token::describe)
            .unwrap_or_else(|| "end of input".to_string());
        Err(self.expression_error(
            self.position(),
            format!("expected {} {}, found {}", token.describe(), context, found),
        ))
    }

    fn expression_error(&self, position: usize, details: impl Into<String>) -> BindError {
        BindError::InvalidExpression {
            expression: self.source.to_string(),
            position,
            details: details.into(),
        }
    }

    /// Go one level deeper in the tree; callers restore `depth` on success
    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.expression_error(
                self.position(),
                format!("expression nested too deeply (limit {})", MAX_NESTING),
            ));
        }
        Ok(())
    }

    fn path_error(&self, position: usize, details: impl Into<String>) -> BindError {
        BindError::InvalidPathSyntax {
            expression: self.source.to_string(),
            position,
            details: details.into(),
        }
    }

    // ═══════════════════════════════════════════
    // PRECEDENCE LEVELS
    // ═══════════════════════════════════════════

    fn conditional(&mut self) -> Result<Expr> {
        let base = self.depth;
        self.descend()?;
        let condition = self.coalesce()?;
        if !self.eat(&Token::Question) {
            self.depth = base;
            return Ok(condition);
        }
        let then_branch = self.conditional()?;
        self.expect(Token::Colon, "in conditional")?;
        let else_branch = self.conditional()?;
        self.depth = base;
        Ok(Expr::Conditional {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        })
    }

    fn coalesce(&mut self) -> Result<Expr> {
        self.binary_level(Self::or, |t| match t {
            Token::Coalesce => Some(BinaryOp::Coalesce),
            _ => None,
        })
    }

    fn or(&mut self) -> Result<Expr> {
        self.binary_level(Self::and, |t| match t {
            Token::OrOr => Some(BinaryOp::Or),
            _ => None,
        })
    }

    fn and(&mut self) -> Result<Expr> {
        self.binary_level(Self::equality, |t| match t {
            Token::AndAnd => Some(BinaryOp::And),
            _ => None,
        })
    }

    fn equality(&mut self) -> Result<Expr> {
        self.binary_level(Self::comparison, |t| match t {
            Token::EqEq => Some(BinaryOp::Eq),
            Token::NotEq => Some(BinaryOp::Ne),
            _ => None,
        })
    }

    fn comparison(&mut self) -> Result<Expr> {
        self.binary_level(Self::additive, |t| match t {
            Token::Lt => Some(BinaryOp::Lt),
            Token::LtEq => Some(BinaryOp::Le),
            Token::Gt => Some(BinaryOp::Gt),
            Token::GtEq => Some(BinaryOp::Ge),
            _ => None,
        })
    }

    fn additive(&mut self) -> Result<Expr> {
        self.binary_level(Self::term, |t| match t {
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    fn term(&mut self) -> Result<Expr> {
        self.binary_level(Self::unary, |t| match t {
            Token::Star => Some(BinaryOp::Mul),
            Token::Slash => Some(BinaryOp::Div),
            Token::Percent => Some(BinaryOp::Rem),
            _ => None,
        })
    }

    /// Left-associative loop shared by every binary level
    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr>,
        operator: fn(&Token) -> Option<BinaryOp>,
    ) -> Result<Expr> {
        let base = self.depth;
        let mut left = next(self)?;
        while let Some(op) = self.peek().and_then(operator) {
            self.cursor += 1;
            // each link pushes the chain built so far one level down
            self.descend()?;
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth = base;
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Neg,
            _ => return self.primary(),
        };
        self.cursor += 1;
        let base = self.depth;
        self.descend()?;
        let operand = self.unary()?;
        self.depth = base;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    // ═══════════════════════════════════════════
    // PRIMARY
    // ═══════════════════════════════════════════

    fn primary(&mut self) -> Result<Expr> {
        let position = self.position();
        let Some(spanned) = self.advance() else {
            return Err(self.expression_error(position, "unexpected end of expression"));
        };

        match spanned.token {
            Token::Number(n) => json_number(n)
                .map(Expr::Literal)
                .ok_or_else(|| self.expression_error(position, "number out of range")),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ if self.peek() == Some(&Token::LParen) => self.call(name, position),
                _ => self.path_run(name).map(Expr::Path),
            },
            Token::LBrace => {
                let Some(Spanned {
                    token: Token::Ident(first),
                    ..
                }) = self.advance()
                else {
                    return Err(self.path_error(position + 1, "expected a path inside '{ }'"));
                };
                let path = self.path_run(first)?;
                self.expect(Token::RBrace, "to close placeholder")?;
                Ok(Expr::Path(path))
            }
            Token::LParen => {
                let inner = self.conditional()?;
                self.expect(Token::RParen, "to close group")?;
                Ok(inner)
            }
            Token::Arrow => Err(self.path_error(position, "path starts with '->'")),
            other => Err(self.expression_error(
                position,
                format!("unexpected {}", other.describe()),
            )),
        }
    }

    /// `first ("->" ident)*`
    fn path_run(&mut self, first: String) -> Result<PathExpr> {
        let mut segments = vec![FieldId::new(first)];
        while self.eat(&Token::Arrow) {
            let position = self.position();
            match self.advance() {
                Some(Spanned {
                    token: Token::Ident(segment),
                    ..
                }) => segments.push(FieldId::new(segment)),
                Some(_) => {
                    return Err(self.path_error(position, "expected field name after '->'"))
                }
                None => return Err(self.path_error(position, "trailing '->'")),
            }
        }
        PathExpr::from_segments(segments)
            .ok_or_else(|| self.path_error(self.position(), "empty path"))
    }

    fn call(&mut self, name: String, position: usize) -> Result<Expr> {
        let function = Builtin::from_name(&name).ok_or(BindError::UnknownFunction { name })?;
        self.expect(Token::LParen, "after function name")?;

        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.conditional()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(Token::RParen, "to close argument list")?;
                break;
            }
        }

        let (min, max) = function.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            let expected = match max {
                Some(max) if max == min => format!("{}", min),
                Some(max) => format!("{}..{}", min, max),
                None => format!("at least {}", min),
            };
            return Err(self.expression_error(
                position,
                format!(
                    "{}() takes {} argument(s), got {}",
                    function,
                    expected,
                    args.len()
                ),
            ));
        }

        Ok(Expr::Call { function, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parse_path;
    use serde_json::json;

    fn p(text: &str) -> Expr {
        Expr::Path(parse_path(text).unwrap())
    }

    fn lit(value: Value) -> Expr {
        Expr::Literal(value)
    }

    fn bin(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[test]
    fn parses_ternary_color_rule() {
        let expr = parse("Temperature > 80 ? 'red' : 'green'").unwrap();
        assert_eq!(
            expr,
            Expr::Conditional {
                condition: Box::new(bin(BinaryOp::Gt, p("Temperature"), lit(json!(80)))),
                then_branch: Box::new(lit(json!("red"))),
                else_branch: Box::new(lit(json!("green"))),
            }
        );
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse("A + B * 2").unwrap();
        assert_eq!(
            expr,
            bin(
                BinaryOp::Add,
                p("A"),
                bin(BinaryOp::Mul, p("B"), lit(json!(2)))
            )
        );
    }

    #[test]
    fn subtraction_is_left_associative() {
        let expr = parse("10 - 3 - 2").unwrap();
        assert_eq!(
            expr,
            bin(
                BinaryOp::Sub,
                bin(BinaryOp::Sub, lit(json!(10)), lit(json!(3))),
                lit(json!(2))
            )
        );
    }

    #[test]
    fn coalesce_is_below_or() {
        let expr = parse("A || B ?? C").unwrap();
        assert_eq!(
            expr,
            bin(BinaryOp::Coalesce, bin(BinaryOp::Or, p("A"), p("B")), p("C"))
        );
    }

    #[test]
    fn nested_ternary_is_right_associative() {
        let expr = parse("A ? 1 : B ? 2 : 3").unwrap();
        match expr {
            Expr::Conditional { else_branch, .. } => {
                assert!(matches!(*else_branch, Expr::Conditional { .. }))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn path_runs_and_placeholders() {
        assert_eq!(parse("Parent->Parent->Status").unwrap(), p("Parent->Parent->Status"));
        assert_eq!(parse("{Parent->Status}").unwrap(), p("Parent->Status"));
        assert_eq!(
            parse("Parent->Level - 1").unwrap(),
            bin(BinaryOp::Sub, p("Parent->Level"), lit(json!(1)))
        );
    }

    #[test]
    fn calls_to_builtins() {
        let expr = parse("round(Level * 100, 1)").unwrap();
        match expr {
            Expr::Call { function, args } => {
                assert_eq!(function, Builtin::Round);
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse("concat()").is_ok());
    }

    #[test]
    fn unknown_function_is_rejected() {
        let err = parse("exec('rm -rf')").unwrap_err();
        assert!(matches!(err, BindError::UnknownFunction { ref name } if name == "exec"));
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let err = parse("pow(2)").unwrap_err();
        assert_eq!(err.code(), "LB-011");
        assert!(err.to_string().contains("pow()"));
    }

    #[test]
    fn trailing_arrow_is_path_syntax_error() {
        let err = parse("Parent->").unwrap_err();
        assert_eq!(err.code(), "LB-010");
        let err = parse("Parent-> > 3").unwrap_err();
        assert_eq!(err.code(), "LB-010");
    }

    #[test]
    fn malformed_scripts() {
        for bad in ["", "A +", "(A", "A B", "? 1 : 2", "A ? 1", "{}"] {
            let err = parse(bad).unwrap_err();
            assert!(err.is_parse_error(), "{bad}: {err}");
        }
    }

    #[test]
    fn deep_nesting_is_an_error_not_an_overflow() {
        let n = 100_000;
        let inputs = [
            format!("{}A", "!".repeat(n)),
            format!("{}A", "-".repeat(n)),
            format!("{}A{}", "(".repeat(n), ")".repeat(n)),
            format!("{}A{}", "abs(".repeat(n), ")".repeat(n)),
            format!("{}1", "A ? 1 : ".repeat(n)),
            format!("A{}", " + A".repeat(n)),
        ];
        for input in &inputs {
            let err = parse(input).unwrap_err();
            assert!(err.is_parse_error());
            assert!(err.to_string().contains("nested too deeply"), "{err}");
        }
    }

    #[test]
    fn moderate_nesting_still_parses() {
        assert!(parse(&format!("{}A{}", "(".repeat(40), ")".repeat(40))).is_ok());
        assert!(parse(&format!("{}A", "!".repeat(40))).is_ok());
        assert!(parse(&format!("A{}", " + 1".repeat(50))).is_ok());
    }

    #[test]
    fn keywords_are_literals() {
        assert_eq!(parse("true").unwrap(), lit(json!(true)));
        assert_eq!(parse("null").unwrap(), lit(Value::Null));
        assert_eq!(
            parse("!false").unwrap(),
            Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(lit(json!(false)))
            }
        );
    }
}
