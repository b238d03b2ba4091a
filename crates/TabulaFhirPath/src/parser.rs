//! Parser for the SQL-on-FHIR FHIRPath dialect.
//!
//! ViewDefinitions use a deliberately small slice of FHIRPath: member
//! navigation, indexing, a fixed function set, literals, and the operators
//! that appear in `where` predicates. The parser accepts exactly that slice
//! and produces an [`Expression`] tree which the evaluator walks; anything
//! outside the dialect is a parse error rather than a runtime surprise.
//!
//! The grammar keeps FHIRPath's precedence for the operators it retains:
//! postfix (`.`, `[]`) over comparison (`<`, `<=`, `>`, `>=`) over equality
//! (`=`, `!=`) over `and` over `or`.

use chumsky::error::Rich;
use chumsky::prelude::*;
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// A literal value in an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// The empty collection, `{}`
    Empty,
    Boolean(bool),
    /// Single-quoted string
    String(String),
    /// Whole number
    Integer(i64),
    /// Number with a decimal point
    Number(Decimal),
    /// `@2020-01-01` — stored without the `@`
    Date(String),
    /// `@2020-01-01T10:30:00Z` — stored without the `@`
    DateTime(String),
    /// `@T10:30:00` — stored without the `@T`
    Time(String),
}

/// A parsed FHIRPath expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A basic term: literal, member, function call, `$this`, `%constant`,
    /// or a parenthesized expression
    Term(Term),
    /// Postfix invocation on a base expression, `base.name` or `base.f(...)`
    Invocation(Box<Expression>, Invocation),
    /// Zero-based indexing, `base[n]`
    Indexer(Box<Expression>, Box<Expression>),
    /// `<`, `<=`, `>`, `>=`
    Inequality(Box<Expression>, String, Box<Expression>),
    /// `=`, `!=`
    Equality(Box<Expression>, String, Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
}

/// A term at the head of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Invocation(Invocation),
    Literal(Literal),
    /// `%name` — resolved from context variables. Validated views never
    /// contain these; constant substitution rewrites them to literals.
    ExternalConstant(String),
    Parenthesized(Box<Expression>),
}

/// A member access, function call, or the focus reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Member(String),
    Function(String, Vec<Expression>),
    /// `$this`
    This,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Empty => write!(f, "{{}}"),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::String(s) => write!(f, "'{}'", s),
            Literal::Integer(n) => write!(f, "{}", n),
            Literal::Number(d) => write!(f, "{}", d),
            Literal::Date(d) => write!(f, "@{}", d),
            Literal::DateTime(dt) => write!(f, "@{}", dt),
            Literal::Time(t) => write!(f, "@T{}", t),
        }
    }
}

/// Builds the dialect parser.
///
/// The returned parser consumes a full expression (trailing input is an
/// error) and yields the [`Expression`] tree. Errors are reported with
/// [`Rich`] diagnostics carrying the offending span.
pub fn parser<'src>()
-> impl Parser<'src, &'src str, Expression, extra::Err<Rich<'src, char>>> + Clone + 'src {
    // Escape sequences inside string literals: \' \\ \/ \f \n \r \t \uXXXX
    let esc = just('\\').ignore_then(choice((
        just('\'').to('\''),
        just('"').to('"'),
        just('`').to('`'),
        just('\\').to('\\'),
        just('/').to('/'),
        just('f').to('\u{000C}'),
        just('n').to('\n'),
        just('r').to('\r'),
        just('t').to('\t'),
        just('u').ignore_then(
            any()
                .filter(|c: &char| c.is_ascii_hexdigit())
                .repeated()
                .exactly(4)
                .collect::<String>()
                .try_map(|digits: String, span| {
                    u32::from_str_radix(&digits, 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| Rich::custom(span, "Invalid unicode escape"))
                }),
        ),
    )));

    // The empty collection: {}
    let empty = just('{')
        .padded()
        .then(just('}'))
        .to(Literal::Empty)
        .boxed();

    let boolean = choice((
        text::keyword("true").to(Literal::Boolean(true)),
        text::keyword("false").to(Literal::Boolean(false)),
    ))
    .boxed();

    // 'single-quoted string' with escapes
    let string = just('\'')
        .ignore_then(none_of("\\'").or(esc.clone()).repeated().collect::<String>())
        .then_ignore(just('\''))
        .map(Literal::String)
        .boxed();

    let digits = any()
        .filter(|c: &char| c.is_ascii_digit())
        .repeated()
        .at_least(1)
        .collect::<String>();

    // Decimal number: requires the point, tried before integer
    let number = digits
        .clone()
        .then_ignore(just('.'))
        .then(digits.clone())
        .try_map(|(whole, frac), span| {
            let text = format!("{}.{}", whole, frac);
            Decimal::from_str(&text)
                .map(Literal::Number)
                .map_err(|_| Rich::custom(span, format!("Invalid number: {}", text)))
        })
        .boxed();

    let integer = digits
        .clone()
        .try_map(|text: String, span| {
            i64::from_str(&text)
                .map(Literal::Integer)
                .map_err(|_| Rich::custom(span, format!("Invalid integer: {}", text)))
        })
        .boxed();

    // Date and time literals keep their textual form; the evaluator compares
    // them as ISO strings.
    let date_chars = any()
        .filter(|c: &char| c.is_ascii_digit() || *c == '-')
        .repeated()
        .at_least(1)
        .collect::<String>();
    let time_chars = any()
        .filter(|c: &char| c.is_ascii_digit() || matches!(*c, ':' | '.'))
        .repeated()
        .at_least(1)
        .collect::<String>();
    let zone_chars = any()
        .filter(|c: &char| c.is_ascii_digit() || matches!(*c, ':' | '.' | '+' | '-' | 'Z'))
        .repeated()
        .collect::<String>();

    // @T10:30:00
    let time_literal = just('@')
        .ignore_then(just('T'))
        .ignore_then(time_chars.clone())
        .map(Literal::Time)
        .boxed();

    // @2020-01-01 or @2020-01-01T10:30:00+01:00
    let date_or_datetime = just('@')
        .ignore_then(date_chars)
        .then(just('T').ignore_then(zone_chars).or_not())
        .map(|(date, time)| match time {
            Some(time) => Literal::DateTime(format!("{}T{}", date, time)),
            None => Literal::Date(date),
        })
        .boxed();

    let literal = choice((
        empty,
        boolean,
        string.clone(),
        number,
        integer,
        time_literal,
        date_or_datetime,
    ))
    .map(Term::Literal)
    .boxed();

    // IDENTIFIER: ([A-Za-z] | '_')([A-Za-z0-9] | '_')*
    let standard_identifier = any()
        .filter(|c: &char| c.is_ascii_alphabetic() || *c == '_')
        .then(
            any()
                .filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_')
                .repeated()
                .collect::<Vec<_>>(),
        )
        .map(|(first, rest): (char, Vec<char>)| {
            let mut name = first.to_string();
            name.extend(rest);
            name
        });

    // `delimited identifier` for names that collide with keywords
    let delimited_identifier = just('`')
        .ignore_then(none_of("`").repeated().collect::<String>())
        .then_ignore(just('`'));

    let identifier = choice((standard_identifier, delimited_identifier)).boxed();

    // %name — external constant reference
    let external_constant = just('%')
        .ignore_then(identifier.clone())
        .map(Term::ExternalConstant)
        .boxed();

    recursive(|expr| {
        let argument_list = expr
            .clone()
            .separated_by(just(',').padded())
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just('(').padded(), just(')').padded());

        let atom = choice((
            literal.clone().map(Expression::Term).boxed(),
            external_constant.clone().map(Expression::Term).boxed(),
            // Function call at the head: identifier(...) — before bare member
            identifier
                .clone()
                .then(argument_list.clone())
                .map(|(name, args)| {
                    Expression::Term(Term::Invocation(Invocation::Function(name, args)))
                })
                .boxed(),
            choice((
                just("$this").to(Invocation::This),
                identifier.clone().map(Invocation::Member),
            ))
            .map(Term::Invocation)
            .map(Expression::Term)
            .boxed(),
            expr.clone()
                .boxed()
                .delimited_by(just('(').padded(), just(')').padded())
                .map(|inner| Expression::Term(Term::Parenthesized(Box::new(inner))))
                .boxed(),
        ))
        .padded();

        // Postfix: .member, .function(...), [index]
        let postfix_op = choice((
            just('.')
                .ignore_then(identifier.clone().then(argument_list.clone().or_not()))
                .map(|(name, args)| {
                    let invocation = match args {
                        Some(args) => Invocation::Function(name, args),
                        None => Invocation::Member(name),
                    };
                    Box::new(move |left: Expression| {
                        Expression::Invocation(Box::new(left), invocation.clone())
                    }) as Box<dyn Fn(Expression) -> Expression>
                }),
            expr.clone()
                .delimited_by(just('[').padded(), just(']').padded())
                .map(|index| {
                    Box::new(move |left: Expression| {
                        Expression::Indexer(Box::new(left), Box::new(index.clone()))
                    }) as Box<dyn Fn(Expression) -> Expression>
                }),
        ))
        .boxed();

        let postfixed = atom
            .then(postfix_op.repeated().collect::<Vec<_>>())
            .map(|(head, ops)| ops.into_iter().fold(head, |acc, op| op(acc)));

        // Comparison binds tighter than equality
        let op_ineq = choice((
            just("<=").to("<="),
            just("<").to("<"),
            just(">=").to(">="),
            just(">").to(">"),
        ))
        .padded();
        let inequality = postfixed
            .clone()
            .then(op_ineq.then(postfixed).repeated().collect::<Vec<_>>())
            .map(|(left, ops)| {
                ops.into_iter().fold(left, |acc, (op, right)| {
                    Expression::Inequality(Box::new(acc), op.to_string(), Box::new(right))
                })
            });

        let op_eq = choice((just("!=").to("!="), just("=").to("="))).padded();
        let equality = inequality
            .clone()
            .boxed()
            .then(
                op_eq
                    .then(inequality.clone().boxed())
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(left, ops)| {
                ops.into_iter().fold(left, |acc, (op, right)| {
                    Expression::Equality(Box::new(acc), op.to_string(), Box::new(right))
                })
            });

        let op_and = text::keyword("and").padded();
        let logical_and = equality
            .clone()
            .boxed()
            .then(
                op_and
                    .ignore_then(equality.clone().boxed())
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(left, rights)| {
                rights.into_iter().fold(left, |acc, right| {
                    Expression::And(Box::new(acc), Box::new(right))
                })
            });

        let op_or = text::keyword("or").padded();
        logical_and
            .clone()
            .boxed()
            .then(
                op_or
                    .ignore_then(logical_and.clone().boxed())
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(left, rights)| {
                rights.into_iter().fold(left, |acc, right| {
                    Expression::Or(Box::new(acc), Box::new(right))
                })
            })
    })
    .then_ignore(end())
}

/// Parses an expression, formatting parse diagnostics into a plain message.
pub fn parse_expression(input: &str) -> Result<Expression, String> {
    parser().parse(input).into_result().map_err(|errors| {
        let detail = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        format!("invalid FHIRPath expression '{}': {}", input, detail)
    })
}
