use super::lexer::{tokenize, Spanned, Token};
use super::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&",
            Self::Or => "|",
        }
    }

    fn comparison(symbol: &str) -> Option<Self> {
        match symbol {
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            _ => None,
        }
    }
}

/// The allowed function set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Function {
    Log,
    Exp,
    Abs,
    Sqrt,
    Floor,
    Ceil,
    Min,
    Max,
    Clip,
    Where,
    IsNull,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "log" => Some(Self::Log),
            "exp" => Some(Self::Exp),
            "abs" => Some(Self::Abs),
            "sqrt" => Some(Self::Sqrt),
            "floor" => Some(Self::Floor),
            "ceil" => Some(Self::Ceil),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "clip" => Some(Self::Clip),
            "where" => Some(Self::Where),
            "isnull" => Some(Self::IsNull),
            _ => None,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Exp => "exp",
            Self::Abs => "abs",
            Self::Sqrt => "sqrt",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Min => "min",
            Self::Max => "max",
            Self::Clip => "clip",
            Self::Where => "where",
            Self::IsNull => "isnull",
        }
    }

    fn arity(self) -> usize {
        match self {
            Self::Min | Self::Max => 2,
            Self::Clip | Self::Where => 3,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Number(f64),
    Text(String),
    Name(String),
    /// `base.attr`, only meaningful as `df.<column>` in environment expressions.
    Attribute {
        base: String,
        attr: String,
    },
    /// `provider['key']`
    Lookup {
        provider: String,
        key: String,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Names used as lookup providers anywhere in the tree.
    pub(crate) fn collect_lookups<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Lookup { provider, .. } => {
                if !out.contains(&provider.as_str()) {
                    out.push(provider);
                }
            }
            Self::Unary { operand, .. } => operand.collect_lookups(out),
            Self::Binary { left, right, .. } => {
                left.collect_lookups(out);
                right.collect_lookups(out);
            }
            Self::Call { args, .. } => {
                for arg in args {
                    arg.collect_lookups(out);
                }
            }
            Self::Number(_) | Self::Text(_) | Self::Name(_) | Self::Attribute { .. } => {}
        }
    }
}

pub(crate) fn parse(source: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ParseError::new(0, "empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
    };
    let expr = parser.or_expr()?;
    match parser.peek() {
        None => Ok(expr),
        Some(spanned) => Err(ParseError::new(
            spanned.offset,
            format!("unexpected trailing {}", describe(&spanned.token)),
        )),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.end, |spanned| spanned.offset)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let spanned = self.tokens.get(self.pos).cloned();
        if spanned.is_some() {
            self.pos += 1;
        }
        spanned
    }

    fn eat_op(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Spanned { token: Token::Op(op), .. }) if *op == symbol) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Spanned { token: Token::Ident(name), .. }) if name == keyword)
        {
            self.pos += 1;
            return true;
        }
        false
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek().map(|spanned| &spanned.token) == Some(token) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect(&mut self, token: Token) -> Result<(), ParseError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {}", describe(&token))))
        }
    }

    fn unexpected(&self, context: &str) -> ParseError {
        match self.peek() {
            Some(spanned) => ParseError::new(
                spanned.offset,
                format!("{context}, found {}", describe(&spanned.token)),
            ),
            None => ParseError::new(self.end, format!("{context}, found end of expression")),
        }
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;
        while self.eat_op("|") || self.eat_keyword("or") {
            let right = self.and_expr()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not_expr()?;
        while self.eat_op("&") || self.eat_keyword("and") {
            let right = self.not_expr()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.eat_keyword("not") {
            let operand = self.not_expr()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    /// Chained comparisons `a < b < c` expand to `(a < b) & (b < c)`.
    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut operand = self.additive()?;
        let mut chained: Option<Expr> = None;
        loop {
            let op = match self.peek() {
                Some(Spanned {
                    token: Token::Op(symbol),
                    ..
                }) => BinaryOp::comparison(symbol),
                _ => None,
            };
            let Some(op) = op else { break };
            self.pos += 1;
            let right = self.additive()?;
            let link = binary(op, operand, right.clone());
            chained = Some(match chained {
                Some(previous) => binary(BinaryOp::And, previous, link),
                None => link,
            });
            operand = right;
        }
        Ok(chained.unwrap_or(operand))
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = if self.eat_op("+") {
                BinaryOp::Add
            } else if self.eat_op("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinaryOp::Mul
            } else if self.eat_op("//") {
                BinaryOp::FloorDiv
            } else if self.eat_op("/") {
                BinaryOp::Div
            } else if self.eat_op("%") {
                BinaryOp::Mod
            } else {
                break;
            };
            let right = self.unary()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat_op("-") {
            let operand = self.unary()?;
            return Ok(match operand {
                Expr::Number(value) => Expr::Number(-value),
                other => Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(other),
                },
            });
        }
        if self.eat_op("+") {
            return self.unary();
        }
        if self.eat_op("~") {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            // right associative, and binds tighter than a unary minus on its left
            let exponent = self.unary()?;
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let primary = self.primary()?;
        if !self.eat(&Token::LBracket) {
            return Ok(primary);
        }
        let provider = match primary {
            Expr::Name(name) => name,
            _ => return Err(self.unexpected("only named lookups can be indexed")),
        };
        let key = match self.peek() {
            Some(Spanned {
                token: Token::Text(key),
                ..
            }) => key.clone(),
            _ => return Err(self.unexpected("lookup key must be a string literal")),
        };
        self.pos += 1;
        self.expect(Token::RBracket)?;
        Ok(Expr::Lookup { provider, key })
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let offset = self.offset();
        let Some(spanned) = self.advance() else {
            return Err(ParseError::new(self.end, "unexpected end of expression"));
        };
        match spanned.token {
            Token::Number(value) => Ok(Expr::Number(value)),
            Token::Text(text) => Ok(Expr::Text(text)),
            Token::LParen => {
                let inner = self.or_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => self.named(name, offset),
            other => Err(ParseError::new(
                offset,
                format!("unexpected {}", describe(&other)),
            )),
        }
    }

    fn named(&mut self, name: String, offset: usize) -> Result<Expr, ParseError> {
        match name.as_str() {
            "True" | "true" => return Ok(Expr::Number(1.0)),
            "False" | "false" => return Ok(Expr::Number(0.0)),
            _ => {}
        }

        if self.eat(&Token::LParen) {
            let function = Function::from_name(&name)
                .ok_or_else(|| ParseError::new(offset, format!("unknown function `{name}`")))?;
            let mut args = Vec::new();
            if !self.eat(&Token::RParen) {
                loop {
                    args.push(self.or_expr()?);
                    if self.eat(&Token::Comma) {
                        continue;
                    }
                    self.expect(Token::RParen)?;
                    break;
                }
            }
            if args.len() != function.arity() {
                return Err(ParseError::new(
                    offset,
                    format!(
                        "function `{}` expects {} arguments, got {}",
                        function.name(),
                        function.arity(),
                        args.len()
                    ),
                ));
            }
            return Ok(Expr::Call { function, args });
        }

        if self.eat(&Token::Dot) {
            let attr = match self.peek() {
                Some(Spanned {
                    token: Token::Ident(attr),
                    ..
                }) => attr.clone(),
                _ => return Err(self.unexpected("expected attribute name")),
            };
            self.pos += 1;
            return Ok(Expr::Attribute { base: name, attr });
        }

        Ok(Expr::Name(name))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(value) => format!("number {value}"),
        Token::Text(text) => format!("string '{text}'"),
        Token::Ident(name) => format!("identifier `{name}`"),
        Token::Op(op) => format!("`{op}`"),
        Token::LParen => "`(`".to_string(),
        Token::RParen => "`)`".to_string(),
        Token::LBracket => "`[`".to_string(),
        Token::RBracket => "`]`".to_string(),
        Token::Comma => "`,`".to_string(),
        Token::Dot => "`.`".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(value: &str) -> Box<Expr> {
        Box::new(Expr::Name(value.to_string()))
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse("a + b * 2").expect("parse");
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Add,
                left: name("a"),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: name("b"),
                    right: Box::new(Expr::Number(2.0)),
                }),
            }
        );
    }

    #[test]
    fn ampersand_binds_looser_than_comparison() {
        let expr = parse("age > 18 & age < 65").expect("parse");
        let Expr::Binary { op, left, right } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::And);
        assert!(matches!(*left, Expr::Binary { op: BinaryOp::Gt, .. }));
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Lt, .. }));
    }

    #[test]
    fn chained_comparison_expands_to_conjunction() {
        let chained = parse("18 <= age < 65").expect("parse");
        let explicit = parse("(18 <= age) & (age < 65)").expect("parse");
        assert_eq!(chained, explicit);
    }

    #[test]
    fn power_is_right_associative_and_beats_negation() {
        assert_eq!(
            parse("-x ** 2").expect("parse"),
            Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(Expr::Binary {
                    op: BinaryOp::Pow,
                    left: name("x"),
                    right: Box::new(Expr::Number(2.0)),
                }),
            }
        );
        assert_eq!(
            parse("2 ** 3 ** 2").expect("parse"),
            parse("2 ** (3 ** 2)").expect("parse")
        );
    }

    #[test]
    fn lookups_and_attributes_parse() {
        assert_eq!(
            parse("od_skims['DIST']").expect("parse"),
            Expr::Lookup {
                provider: "od_skims".into(),
                key: "DIST".into(),
            }
        );
        assert_eq!(
            parse("df.income").expect("parse"),
            Expr::Attribute {
                base: "df".into(),
                attr: "income".into(),
            }
        );
    }

    #[test]
    fn lookup_key_must_be_literal() {
        let err = parse("od_skims[DIST]").expect_err("non literal key");
        assert!(err.message.contains("string literal"));
    }

    #[test]
    fn unknown_function_and_arity_are_rejected() {
        let err = parse("eval(x)").expect_err("unknown function");
        assert!(err.message.contains("unknown function `eval`"));
        let err = parse("clip(x, 1)").expect_err("arity");
        assert!(err.message.contains("expects 3 arguments, got 2"));
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        let err = parse("a b").expect_err("trailing");
        assert_eq!(err.offset, 2);
    }

    #[test]
    fn literal_negation_folds() {
        assert_eq!(parse("-1.5").expect("parse"), Expr::Number(-1.5));
    }

    #[test]
    fn lookup_names_are_collected_once() {
        let expr = parse("od_skims['DIST'] + od_skims['TIME'] * where(x, dot_skims['DIST'], 0)")
            .expect("parse");
        let mut names = Vec::new();
        expr.collect_lookups(&mut names);
        assert_eq!(names, vec!["od_skims", "dot_skims"]);
    }
}
