//! Recursive-descent Cypher parser with a precedence-climbing expression
//! chain: OR -> XOR -> AND -> NOT -> comparison -> string-op -> additive ->
//! multiplicative -> power -> unary -> property/subscript access -> primary.
//!
//! The parser threads its position explicitly (`Parser { tokens, pos }`)
//! rather than through mutable global state, and is a pure function from
//! a token stream to an AST: no partial AST escapes on error.

use crate::model::Value;
use crate::{Error, Result};

use super::ast::*;
use super::lexer::{Token, TokenKind};

pub fn parse_statement(tokens: &[Token]) -> Result<Statement> {
    let mut p = Parser { tokens, pos: 0 };
    let stmt = p.parse_statement()?;
    p.expect(TokenKind::Eof)?;
    Ok(stmt)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_at(&self, offset: usize) -> TokenKind {
        self.tokens.get(self.pos + offset).map(|t| t.kind).unwrap_or(TokenKind::Eof)
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let tok = self.peek();
            Err(Error::ParseError {
                position: tok.span.start,
                message: format!("expected {kind:?}, found {:?} ({:?})", tok.kind, tok.text),
            })
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        if self.check(TokenKind::Identifier) {
            Ok(self.advance().text.clone())
        } else {
            let tok = self.peek();
            Err(Error::ParseError {
                position: tok.span.start,
                message: format!("expected identifier, found {:?}", tok.kind),
            })
        }
    }

    // ========================================================================
    // Statement / Query
    // ========================================================================

    fn parse_statement(&mut self) -> Result<Statement> {
        self.parse_statement_inner()
    }

    fn parse_statement_inner(&mut self) -> Result<Statement> {
        let first = self.parse_single_query()?;
        if self.check(TokenKind::Union) {
            let mut parts = vec![first];
            let mut all_flags = Vec::new();
            while self.eat(TokenKind::Union) {
                let all = self.eat(TokenKind::All);
                all_flags.push(all);
                parts.push(self.parse_single_query()?);
            }
            return Ok(Statement::Union { parts, all: all_flags });
        }
        Ok(Statement::Query(first))
    }

    fn parse_single_query(&mut self) -> Result<Query> {
        let mut clauses = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Match | TokenKind::Optional => clauses.push(self.parse_match_clause()?),
                TokenKind::With => clauses.push(self.parse_with_clause()?),
                TokenKind::Unwind => clauses.push(self.parse_unwind_clause()?),
                TokenKind::Call => clauses.push(self.parse_call_clause()?),
                TokenKind::Create => clauses.push(self.parse_create_clause()?),
                TokenKind::Merge => clauses.push(self.parse_merge_clause()?),
                TokenKind::Set => clauses.push(self.parse_set_clause()?),
                TokenKind::Remove => clauses.push(self.parse_remove_clause()?),
                TokenKind::Delete | TokenKind::Detach => clauses.push(self.parse_delete_clause()?),
                TokenKind::Return => {
                    let return_clause = Some(self.parse_return_clause()?);
                    return Ok(Query { clauses, return_clause });
                }
                _ => return Ok(Query { clauses, return_clause: None }),
            }
        }
    }

    // ========================================================================
    // Clauses
    // ========================================================================

    fn parse_match_clause(&mut self) -> Result<Clause> {
        let optional = self.eat(TokenKind::Optional);
        self.expect(TokenKind::Match)?;
        let patterns = self.parse_pattern_list()?;
        let where_clause = if self.eat(TokenKind::Where) { Some(self.parse_expr()?) } else { None };
        Ok(Clause::Match(MatchClause { optional, patterns, where_clause }))
    }

    fn parse_with_clause(&mut self) -> Result<Clause> {
        self.expect(TokenKind::With)?;
        let distinct = self.eat(TokenKind::Distinct);
        let items = self.parse_projection_items()?;
        for item in &items {
            if item.alias.is_none() && !matches!(item.expr, Expr::Variable(_)) {
                return Err(Error::SemanticError(
                    "NoExpressionAlias: WITH requires an alias for non-variable expressions".into(),
                ));
            }
        }
        let where_clause = if self.eat(TokenKind::Where) { Some(self.parse_expr()?) } else { None };
        let order_by = self.parse_order_by()?;
        let skip = self.parse_skip()?;
        let limit = self.parse_limit()?;
        Ok(Clause::With(WithClause { distinct, items, where_clause, order_by, skip, limit }))
    }

    fn parse_unwind_clause(&mut self) -> Result<Clause> {
        self.expect(TokenKind::Unwind)?;
        let expr = self.parse_expr()?;
        self.expect(TokenKind::As)?;
        let var = self.expect_identifier()?;
        Ok(Clause::Unwind { expr, var })
    }

    fn parse_call_clause(&mut self) -> Result<Clause> {
        self.expect(TokenKind::Call)?;
        let mut imported_vars = Vec::new();
        if self.check(TokenKind::LParen) {
            self.advance();
            if !self.check(TokenKind::RParen) {
                loop {
                    imported_vars.push(self.expect_identifier()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RParen)?;
        }
        self.expect(TokenKind::LBrace)?;
        if imported_vars.is_empty() && self.check(TokenKind::With) {
            // An initial bare-variable WITH inside the subquery body also
            // counts as an explicit import list.
            let save = self.pos;
            if let Clause::With(w) = self.parse_with_clause()? {
                let plain = w.where_clause.is_none() && w.order_by.is_empty() && w.skip.is_none() && w.limit.is_none();
                let mut names = Vec::new();
                let mut all_bare = plain;
                if plain {
                    for item in &w.items {
                        match (&item.expr, &item.alias) {
                            (Expr::Variable(name), None) => names.push(name.clone()),
                            (Expr::Variable(name), Some(alias)) if alias == name => names.push(name.clone()),
                            _ => {
                                all_bare = false;
                                break;
                            }
                        }
                    }
                }
                if all_bare {
                    imported_vars = names;
                } else {
                    self.pos = save;
                }
            } else {
                self.pos = save;
            }
        }
        let inner = self.parse_statement_until_rbrace()?;
        self.expect(TokenKind::RBrace)?;
        Ok(Clause::Call(CallSubquery { imported_vars, query: Box::new(inner) }))
    }

    fn parse_statement_until_rbrace(&mut self) -> Result<Statement> {
        self.parse_statement_inner()
    }

    fn parse_create_clause(&mut self) -> Result<Clause> {
        self.expect(TokenKind::Create)?;
        Ok(Clause::Create(self.parse_pattern_list()?))
    }

    fn parse_merge_clause(&mut self) -> Result<Clause> {
        self.expect(TokenKind::Merge)?;
        let pattern = self.parse_pattern()?;
        let mut on_create = Vec::new();
        let mut on_match = Vec::new();
        loop {
            if self.check(TokenKind::On) && self.peek_at(1) == TokenKind::Create {
                self.advance();
                self.advance();
                self.expect(TokenKind::Set)?;
                on_create.extend(self.parse_set_items()?);
            } else if self.check(TokenKind::On) && self.peek_at(1) == TokenKind::Match {
                self.advance();
                self.advance();
                self.expect(TokenKind::Set)?;
                on_match.extend(self.parse_set_items()?);
            } else {
                break;
            }
        }
        Ok(Clause::Merge(MergeClause { pattern, on_create, on_match }))
    }

    fn parse_set_clause(&mut self) -> Result<Clause> {
        self.expect(TokenKind::Set)?;
        Ok(Clause::Set(self.parse_set_items()?))
    }

    fn parse_set_items(&mut self) -> Result<Vec<SetItem>> {
        let mut items = Vec::new();
        loop {
            let target = self.parse_property_access_base()?;
            if self.eat(TokenKind::PlusEq) {
                let value = self.parse_expr()?;
                items.push(SetItem::AddProperties { target, value });
            } else if self.check(TokenKind::Colon) {
                let mut labels = Vec::new();
                while self.eat(TokenKind::Colon) {
                    labels.push(self.expect_identifier()?);
                }
                items.push(SetItem::SetLabel { target, labels });
            } else if let Expr::Property { target: base, key } = target {
                self.expect(TokenKind::Eq)?;
                let value = self.parse_expr()?;
                items.push(SetItem::Property { target: *base, key, value });
            } else {
                self.expect(TokenKind::Eq)?;
                let value = self.parse_expr()?;
                items.push(SetItem::ReplaceProperties { target, value });
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(items)
    }

    /// Parses `variable` or `variable.property` — the limited left-hand
    /// side grammar legal in `SET`/`REMOVE` targets.
    fn parse_property_access_base(&mut self) -> Result<Expr> {
        let name = self.expect_identifier()?;
        let mut expr = Expr::Variable(name);
        while self.check(TokenKind::Dot) {
            self.advance();
            let key = self.expect_identifier()?;
            expr = Expr::Property { target: Box::new(expr), key };
        }
        Ok(expr)
    }

    fn parse_remove_clause(&mut self) -> Result<Clause> {
        self.expect(TokenKind::Remove)?;
        let mut items = Vec::new();
        loop {
            let target = self.parse_property_access_base()?;
            if self.check(TokenKind::Colon) {
                let mut labels = Vec::new();
                while self.eat(TokenKind::Colon) {
                    labels.push(self.expect_identifier()?);
                }
                items.push(RemoveItem::Label { target, labels });
            } else if let Expr::Property { target: base, key } = target {
                items.push(RemoveItem::Property { target: *base, key });
            } else {
                return Err(Error::ParseError {
                    position: self.peek().span.start,
                    message: "REMOVE requires a property or label target".into(),
                });
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(Clause::Remove(items))
    }

    fn parse_delete_clause(&mut self) -> Result<Clause> {
        let detach = self.eat(TokenKind::Detach);
        self.expect(TokenKind::Delete)?;
        let mut exprs = vec![self.parse_expr()?];
        while self.eat(TokenKind::Comma) {
            exprs.push(self.parse_expr()?);
        }
        Ok(Clause::Delete { exprs, detach })
    }

    fn parse_return_clause(&mut self) -> Result<ReturnClause> {
        self.expect(TokenKind::Return)?;
        let distinct = self.eat(TokenKind::Distinct);
        let items = self.parse_projection_items()?;
        let order_by = self.parse_order_by()?;
        let skip = self.parse_skip()?;
        let limit = self.parse_limit()?;
        Ok(ReturnClause { distinct, items, order_by, skip, limit })
    }

    fn parse_projection_items(&mut self) -> Result<Vec<ProjectionItem>> {
        let mut items = Vec::new();
        loop {
            if self.check(TokenKind::Star) {
                self.advance();
                items.push(ProjectionItem { expr: Expr::Variable("*".into()), alias: None });
            } else {
                let expr = self.parse_expr()?;
                let alias = if self.eat(TokenKind::As) { Some(self.expect_identifier()?) } else { None };
                items.push(ProjectionItem { expr, alias });
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_order_by(&mut self) -> Result<Vec<OrderItem>> {
        if !(self.check(TokenKind::Order) && self.peek_at(1) == TokenKind::By) {
            return Ok(Vec::new());
        }
        self.advance();
        self.advance();
        let mut items = Vec::new();
        loop {
            let expr = self.parse_expr()?;
            let descending = if self.eat(TokenKind::Desc) {
                true
            } else {
                self.eat(TokenKind::Asc);
                false
            };
            items.push(OrderItem { expr, descending });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_skip(&mut self) -> Result<Option<Expr>> {
        if self.eat(TokenKind::Skip) { Ok(Some(self.parse_expr()?)) } else { Ok(None) }
    }

    fn parse_limit(&mut self) -> Result<Option<Expr>> {
        if self.eat(TokenKind::Limit) { Ok(Some(self.parse_expr()?)) } else { Ok(None) }
    }

    // ========================================================================
    // Patterns
    // ========================================================================

    fn parse_pattern_list(&mut self) -> Result<Vec<PatternPart>> {
        let mut parts = vec![self.parse_pattern()?];
        while self.eat(TokenKind::Comma) {
            parts.push(self.parse_pattern()?);
        }
        Ok(parts)
    }

    fn parse_pattern(&mut self) -> Result<PatternPart> {
        let name = if self.check(TokenKind::Identifier) && self.peek_at(1) == TokenKind::Eq {
            let n = self.advance().text.clone();
            self.advance(); // '='
            Some(n)
        } else {
            None
        };
        let start = self.parse_node_pattern()?;
        let mut elements = Vec::new();
        while self.check(TokenKind::Dash) || self.check(TokenKind::LeftArrow) {
            let rel = self.parse_rel_pattern()?;
            let node = self.parse_node_pattern()?;
            elements.push((rel, node));
        }
        Ok(PatternPart { name, start, elements })
    }

    fn parse_node_pattern(&mut self) -> Result<NodePattern> {
        self.expect(TokenKind::LParen)?;
        let name = if self.check(TokenKind::Identifier) { Some(self.advance().text.clone()) } else { None };
        let label_expr = if self.check(TokenKind::Colon) { Some(self.parse_label_expr()?) } else { None };
        let properties = if self.check(TokenKind::LBrace) { Some(self.parse_prop_map_literal()?) } else { None };
        let where_clause = if self.eat(TokenKind::Where) { Some(self.parse_expr()?) } else { None };
        self.expect(TokenKind::RParen)?;
        Ok(NodePattern { name, label_expr, properties, where_clause })
    }

    /// Label expression grammar: `:A`, `:A&B`, `:A|B`, `:!A`, `:%`, with
    /// parenthesised grouping; `:` before each top-level disjunct is also
    /// accepted (`:A:B` meaning `A&B`, the historical multi-label form).
    fn parse_label_expr(&mut self) -> Result<LabelExpr> {
        self.expect(TokenKind::Colon)?;
        let mut expr = self.parse_label_or()?;
        while self.check(TokenKind::Colon) {
            self.advance();
            let rhs = self.parse_label_or()?;
            expr = LabelExpr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_label_or(&mut self) -> Result<LabelExpr> {
        let mut lhs = self.parse_label_and()?;
        while self.eat(TokenKind::Pipe) {
            let rhs = self.parse_label_and()?;
            lhs = LabelExpr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_label_and(&mut self) -> Result<LabelExpr> {
        let mut lhs = self.parse_label_unary()?;
        while self.eat(TokenKind::Amp) {
            let rhs = self.parse_label_unary()?;
            lhs = LabelExpr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_label_unary(&mut self) -> Result<LabelExpr> {
        if self.eat(TokenKind::Bang) {
            return Ok(LabelExpr::Not(Box::new(self.parse_label_unary()?)));
        }
        if self.eat(TokenKind::Percent) {
            return Ok(LabelExpr::Wildcard);
        }
        if self.eat(TokenKind::LParen) {
            let inner = self.parse_label_or()?;
            self.expect(TokenKind::RParen)?;
            return Ok(inner);
        }
        Ok(LabelExpr::Label(self.expect_identifier()?))
    }

    fn parse_prop_map_literal(&mut self) -> Result<PropMapLiteral> {
        self.expect(TokenKind::LBrace)?;
        let mut entries = Vec::new();
        if !self.check(TokenKind::RBrace) {
            loop {
                let key = self.expect_identifier()?;
                self.expect(TokenKind::Colon)?;
                let value = self.parse_expr()?;
                entries.push((key, value));
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(entries)
    }

    fn parse_rel_pattern(&mut self) -> Result<RelPattern> {
        let left_arrow = self.eat(TokenKind::LeftArrow);
        if !left_arrow {
            self.expect(TokenKind::Dash)?;
        }

        let mut name = None;
        let mut types = Vec::new();
        let mut quantifier = None;
        let mut properties = None;
        let mut where_clause = None;

        if self.eat(TokenKind::LBracket) {
            if self.check(TokenKind::Identifier) {
                name = Some(self.advance().text.clone());
            }
            if self.eat(TokenKind::Colon) {
                types.push(self.expect_identifier()?);
                while self.eat(TokenKind::Pipe) {
                    types.push(self.expect_identifier()?);
                }
            }
            if self.check(TokenKind::Star) || (self.check(TokenKind::LBrace) && self.is_quantifier_brace()) {
                quantifier = Some(self.parse_quantifier()?);
            }
            if self.check(TokenKind::LBrace) {
                properties = Some(self.parse_prop_map_literal()?);
            }
            if self.eat(TokenKind::Where) {
                where_clause = Some(self.parse_expr()?);
            }
            self.expect(TokenKind::RBracket)?;
        }

        // Closing marker: `->` ends an outgoing pattern; a bare `-` closes
        // an undirected (`--`) or incoming (opened with `<-`, closed `-`) one.
        let right_arrow = self.eat(TokenKind::Arrow);
        if !right_arrow {
            self.expect(TokenKind::Dash)?;
        }
        let direction = match (left_arrow, right_arrow) {
            (true, false) => ArrowDirection::Incoming,
            (false, true) => ArrowDirection::Outgoing,
            (false, false) => ArrowDirection::Either,
            (true, true) => {
                return Err(Error::ParseError {
                    position: self.peek().span.start,
                    message: "relationship pattern cannot point both directions".into(),
                });
            }
        };

        Ok(RelPattern { name, types, direction, quantifier, properties, where_clause })
    }

    /// A `{min,max}` quantifier and a property map both start with `{`;
    /// disambiguate by checking whether the brace's first token is an
    /// integer or a bare comma (quantifier), not an identifier (map).
    fn is_quantifier_brace(&self) -> bool {
        matches!(self.peek_at(1), TokenKind::Integer | TokenKind::Comma)
    }

    fn parse_quantifier(&mut self) -> Result<Quantifier> {
        if self.eat(TokenKind::Star) {
            if self.check(TokenKind::Integer) {
                let min = self.advance().text.parse::<u32>().ok();
                if self.eat(TokenKind::DotDot) {
                    let max = if self.check(TokenKind::Integer) {
                        self.advance().text.parse::<u32>().ok()
                    } else {
                        None
                    };
                    Ok(Quantifier { min, max })
                } else {
                    Ok(Quantifier { min, max: min })
                }
            } else if self.eat(TokenKind::DotDot) {
                let max = if self.check(TokenKind::Integer) {
                    self.advance().text.parse::<u32>().ok()
                } else {
                    None
                };
                Ok(Quantifier { min: None, max })
            } else {
                Ok(Quantifier { min: None, max: None })
            }
        } else {
            self.expect(TokenKind::LBrace)?;
            let min = if self.check(TokenKind::Integer) { self.advance().text.parse::<u32>().ok() } else { None };
            let max = if self.eat(TokenKind::Comma) {
                if self.check(TokenKind::Integer) { self.advance().text.parse::<u32>().ok() } else { None }
            } else {
                min
            };
            self.expect(TokenKind::RBrace)?;
            Ok(Quantifier { min, max })
        }
    }

    // ========================================================================
    // Expressions (precedence-climbing)
    // ========================================================================

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or_expr()
    }

    fn parse_or_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_xor_expr()?;
        while self.eat(TokenKind::Or) {
            let rhs = self.parse_xor_expr()?;
            lhs = Expr::BinaryOp { op: BinaryOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_xor_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and_expr()?;
        while self.eat(TokenKind::Xor) {
            let rhs = self.parse_and_expr()?;
            lhs = Expr::BinaryOp { op: BinaryOp::Xor, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_and_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_not_expr()?;
        while self.eat(TokenKind::And) {
            let rhs = self.parse_not_expr()?;
            lhs = Expr::BinaryOp { op: BinaryOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_not_expr(&mut self) -> Result<Expr> {
        if self.eat(TokenKind::Not) {
            let operand = self.parse_not_expr()?;
            return Ok(Expr::UnaryOp { op: UnaryOp::Not, operand: Box::new(operand) });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_string_op()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Eq => Some(BinaryOp::Eq),
                TokenKind::Neq => Some(BinaryOp::Neq),
                TokenKind::Lt => Some(BinaryOp::Lt),
                TokenKind::Lte => Some(BinaryOp::Lte),
                TokenKind::Gt => Some(BinaryOp::Gt),
                TokenKind::Gte => Some(BinaryOp::Gte),
                _ => None,
            };
            if let Some(op) = op {
                self.advance();
                let rhs = self.parse_string_op()?;
                lhs = Expr::BinaryOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
                continue;
            }
            if self.check(TokenKind::Is) {
                self.advance();
                let negated = self.eat(TokenKind::Not);
                self.expect(TokenKind::Null)?;
                lhs = Expr::IsNull { operand: Box::new(lhs), negated };
                continue;
            }
            if self.check(TokenKind::In) {
                self.advance();
                let list = self.parse_string_op()?;
                lhs = Expr::In { probe: Box::new(lhs), list: Box::new(list) };
                continue;
            }
            if self.check(TokenKind::Colon) {
                let label_expr = self.parse_label_expr()?;
                lhs = Expr::HasLabel { operand: Box::new(lhs), label_expr };
                continue;
            }
            break;
        }
        Ok(lhs)
    }

    fn parse_string_op(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            if self.check(TokenKind::Starts) && self.peek_at(1) == TokenKind::With {
                self.advance();
                self.advance();
                let rhs = self.parse_additive()?;
                lhs = Expr::StringOp { op: StringOp::StartsWith, lhs: Box::new(lhs), rhs: Box::new(rhs) };
            } else if self.check(TokenKind::Ends) && self.peek_at(1) == TokenKind::With {
                self.advance();
                self.advance();
                let rhs = self.parse_additive()?;
                lhs = Expr::StringOp { op: StringOp::EndsWith, lhs: Box::new(lhs), rhs: Box::new(rhs) };
            } else if self.check(TokenKind::Contains) {
                self.advance();
                let rhs = self.parse_additive()?;
                lhs = Expr::StringOp { op: StringOp::Contains, lhs: Box::new(lhs), rhs: Box::new(rhs) };
            } else if self.check(TokenKind::RegexMatch) {
                self.advance();
                let rhs = self.parse_additive()?;
                lhs = Expr::StringOp { op: StringOp::RegexMatch, lhs: Box::new(lhs), rhs: Box::new(rhs) };
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Dash => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::BinaryOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_power()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_power()?;
            lhs = Expr::BinaryOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    /// `^` is right-associative and binds tighter than unary `-`
    /// (`-2^2 == -4`), so unary is parsed *inside* this level's operand.
    fn parse_power(&mut self) -> Result<Expr> {
        let lhs = self.parse_unary()?;
        if self.eat(TokenKind::Caret) {
            let rhs = self.parse_power()?;
            return Ok(Expr::BinaryOp { op: BinaryOp::Pow, lhs: Box::new(lhs), rhs: Box::new(rhs) });
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat(TokenKind::Dash) {
            let operand = self.parse_unary()?;
            return Ok(Expr::UnaryOp { op: UnaryOp::Neg, operand: Box::new(operand) });
        }
        if self.eat(TokenKind::Plus) {
            return self.parse_unary();
        }
        self.parse_postfix()
    }

    /// Property access, subscript, and slice bind tighter than any
    /// operator above and chain left-to-right (`a.b.c`, `a[0][1]`).
    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(TokenKind::Dot) {
                let key = self.expect_identifier()?;
                expr = Expr::Property { target: Box::new(expr), key };
            } else if self.check(TokenKind::LBracket) {
                self.advance();
                if self.check(TokenKind::DotDot) {
                    self.advance();
                    let to = if self.check(TokenKind::RBracket) { None } else { Some(Box::new(self.parse_expr()?)) };
                    self.expect(TokenKind::RBracket)?;
                    expr = Expr::Slice { target: Box::new(expr), from: None, to };
                } else {
                    let first = self.parse_expr()?;
                    if self.eat(TokenKind::DotDot) {
                        let to = if self.check(TokenKind::RBracket) {
                            None
                        } else {
                            Some(Box::new(self.parse_expr()?))
                        };
                        self.expect(TokenKind::RBracket)?;
                        expr = Expr::Slice { target: Box::new(expr), from: Some(Box::new(first)), to };
                    } else {
                        self.expect(TokenKind::RBracket)?;
                        expr = Expr::Subscript { target: Box::new(expr), index: Box::new(first) };
                    }
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek_kind() {
            TokenKind::Integer => {
                let text = self.advance().text.clone();
                let n: i64 = text.parse().map_err(|_| Error::ParseError {
                    position: self.peek().span.start,
                    message: format!("invalid integer literal: {text}"),
                })?;
                Ok(Expr::Literal(Value::Int(n)))
            }
            TokenKind::Float => {
                let text = self.advance().text.clone();
                let n: f64 = text.parse().map_err(|_| Error::ParseError {
                    position: self.peek().span.start,
                    message: format!("invalid float literal: {text}"),
                })?;
                Ok(Expr::Literal(Value::Float(n)))
            }
            TokenKind::StringLiteral => {
                let text = self.advance().text.clone();
                Ok(Expr::Literal(Value::Str(text)))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            TokenKind::Parameter => {
                let name = self.advance().text.clone();
                Ok(Expr::Parameter(name))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.check(TokenKind::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBracket)?;
                Ok(Expr::List(items))
            }
            TokenKind::LBrace => {
                let entries = self.parse_prop_map_literal()?;
                Ok(Expr::MapLiteral(entries))
            }
            TokenKind::Case => self.parse_case_expr(),
            TokenKind::Exists => self.parse_exists_expr(),
            TokenKind::Count => self.parse_count_expr(),
            TokenKind::Identifier
            | TokenKind::All
            | TokenKind::Any
            | TokenKind::NoneKw
            | TokenKind::Single => self.parse_identifier_or_call(),
            _ => {
                let tok = self.peek();
                Err(Error::ParseError {
                    position: tok.span.start,
                    message: format!("unexpected token in expression: {:?}", tok.kind),
                })
            }
        }
    }

    /// Function-call style identifiers — also accepts the predicate
    /// keywords `ALL`/`ANY`/`NONE`/`SINGLE`, which are always followed by
    /// `(...)` in this grammar and are otherwise ordinary function names.
    fn parse_identifier_or_call(&mut self) -> Result<Expr> {
        let name = match self.peek_kind() {
            TokenKind::All => "all",
            TokenKind::Any => "any",
            TokenKind::NoneKw => "none",
            TokenKind::Single => "single",
            _ => "",
        };
        let name = if name.is_empty() { self.advance().text.clone() } else {
            self.advance();
            name.to_string()
        };
        if self.check(TokenKind::LParen) {
            self.advance();
            let distinct = self.eat(TokenKind::Distinct);
            let mut args = Vec::new();
            if self.check(TokenKind::Star) {
                self.advance();
                args.push(Expr::Variable("*".into()));
            } else if !self.check(TokenKind::RParen) {
                loop {
                    args.push(self.parse_expr()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::FunctionCall { name, args, distinct });
        }
        Ok(Expr::Variable(name))
    }

    fn parse_case_expr(&mut self) -> Result<Expr> {
        self.expect(TokenKind::Case)?;
        let subject = if !self.check(TokenKind::When) { Some(Box::new(self.parse_expr()?)) } else { None };
        let mut whens = Vec::new();
        while self.eat(TokenKind::When) {
            let cond = self.parse_expr()?;
            self.expect(TokenKind::Then)?;
            let result = self.parse_expr()?;
            whens.push((cond, result));
        }
        let default = if self.eat(TokenKind::Else) { Some(Box::new(self.parse_expr()?)) } else { None };
        self.expect(TokenKind::End)?;
        Ok(Expr::Case { subject, whens, default })
    }

    fn parse_exists_expr(&mut self) -> Result<Expr> {
        self.expect(TokenKind::Exists)?;
        self.expect(TokenKind::LBrace)?;
        let inner = self.parse_statement_until_rbrace()?;
        self.expect(TokenKind::RBrace)?;
        reject_write_clauses(&inner)?;
        Ok(Expr::Exists(Box::new(inner)))
    }

    fn parse_count_expr(&mut self) -> Result<Expr> {
        self.expect(TokenKind::Count)?;
        self.expect(TokenKind::LBrace)?;
        let inner = self.parse_statement_until_rbrace()?;
        self.expect(TokenKind::RBrace)?;
        reject_write_clauses(&inner)?;
        Ok(Expr::Count(Box::new(inner)))
    }
}

/// `EXISTS {}`/`COUNT {}` may not contain a write clause, to avoid
/// observable side effects inside predicate evaluation.
fn reject_write_clauses(stmt: &Statement) -> Result<()> {
    let queries: Vec<&Query> = match stmt {
        Statement::Query(q) => vec![q],
        Statement::Union { parts, .. } => parts.iter().collect(),
    };
    for q in queries {
        for clause in &q.clauses {
            let is_write = matches!(
                clause,
                Clause::Create(_) | Clause::Merge(_) | Clause::Set(_) | Clause::Remove(_) | Clause::Delete { .. }
            );
            if is_write {
                return Err(Error::SemanticError(
                    "EXISTS {} / COUNT {} may not contain a write clause".into(),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn parse(q: &str) -> Statement {
        let tokens = tokenize(q).unwrap();
        parse_statement(&tokens).unwrap()
    }

    #[test]
    fn test_simple_match_return() {
        let stmt = parse("MATCH (n:Person) RETURN n");
        match stmt {
            Statement::Query(q) => {
                assert_eq!(q.clauses.len(), 1);
                assert!(q.return_clause.is_some());
            }
            _ => panic!("expected Query"),
        }
    }

    #[test]
    fn test_label_boolean_expr() {
        let stmt = parse("MATCH (n:A&B|!C) RETURN n");
        let Statement::Query(q) = stmt else { panic!() };
        let Clause::Match(m) = &q.clauses[0] else { panic!() };
        assert!(m.patterns[0].start.label_expr.is_some());
    }

    #[test]
    fn test_variable_length_pattern() {
        let stmt = parse("MATCH (a)-[:R*1..3]->(b) RETURN b");
        let Statement::Query(q) = stmt else { panic!() };
        let Clause::Match(m) = &q.clauses[0] else { panic!() };
        let (rel, _) = &m.patterns[0].elements[0];
        assert_eq!(rel.quantifier, Some(Quantifier { min: Some(1), max: Some(3) }));
    }

    #[test]
    fn test_unbounded_quantifier() {
        let stmt = parse("MATCH (a)-[:R*]->(b) RETURN b");
        let Statement::Query(q) = stmt else { panic!() };
        let Clause::Match(m) = &q.clauses[0] else { panic!() };
        let (rel, _) = &m.patterns[0].elements[0];
        assert_eq!(rel.quantifier, Some(Quantifier { min: None, max: None }));
    }

    #[test]
    fn test_union() {
        let stmt = parse("MATCH (n:A) RETURN n.x AS x UNION MATCH (n:B) RETURN n.y AS x");
        assert!(matches!(stmt, Statement::Union { .. }));
    }

    #[test]
    fn test_remove_property_and_label() {
        let stmt = parse("MATCH (n) REMOVE n.age, n:Old RETURN n");
        let Statement::Query(q) = stmt else { panic!() };
        let Clause::Remove(items) = &q.clauses[1] else { panic!() };
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], RemoveItem::Property { .. }));
        assert!(matches!(items[1], RemoveItem::Label { .. }));
    }

    #[test]
    fn test_call_subquery_with_import() {
        let stmt = parse("MATCH (n) CALL (n) { RETURN n.age AS age } RETURN age");
        let Statement::Query(q) = stmt else { panic!() };
        let Clause::Call(call) = &q.clauses[1] else { panic!() };
        assert_eq!(call.imported_vars, vec!["n".to_string()]);
    }

    #[test]
    fn test_exists_subquery() {
        let stmt = parse("MATCH (n) WHERE EXISTS { MATCH (n)-[:R]->() } RETURN n");
        let Statement::Query(q) = stmt else { panic!() };
        let Clause::Match(m) = &q.clauses[0] else { panic!() };
        assert!(matches!(m.where_clause, Some(Expr::Exists(_))));
    }

    #[test]
    fn test_exists_rejects_write() {
        let tokens = tokenize("MATCH (n) WHERE EXISTS { CREATE (m) } RETURN n").unwrap();
        assert!(parse_statement(&tokens).is_err());
    }

    #[test]
    fn test_power_right_associative_and_precedence() {
        let stmt = parse("RETURN 2^3^2");
        let Statement::Query(q) = stmt else { panic!() };
        let item = &q.return_clause.unwrap().items[0];
        // 2^(3^2), not (2^3)^2
        if let Expr::BinaryOp { op: BinaryOp::Pow, rhs, .. } = &item.expr {
            assert!(matches!(**rhs, Expr::BinaryOp { op: BinaryOp::Pow, .. }));
        } else {
            panic!("expected Pow");
        }
    }

    #[test]
    fn test_starts_with_and_contains() {
        let stmt = parse("MATCH (n) WHERE n.name STARTS WITH 'A' AND n.name CONTAINS 'l' RETURN n");
        let Statement::Query(q) = stmt else { panic!() };
        let Clause::Match(m) = &q.clauses[0] else { panic!() };
        assert!(m.where_clause.is_some());
    }

    #[test]
    fn test_merge_on_create_on_match() {
        let stmt = parse("MERGE (u:U {id:1}) ON CREATE SET u.created=1 ON MATCH SET u.seen=1 RETURN u");
        let Statement::Query(q) = stmt else { panic!() };
        let Clause::Merge(merge) = &q.clauses[0] else { panic!() };
        assert_eq!(merge.on_create.len(), 1);
        assert_eq!(merge.on_match.len(), 1);
    }

    #[test]
    fn test_with_requires_alias() {
        let tokens = tokenize("MATCH (n) WITH n.age RETURN n").unwrap();
        assert!(parse_statement(&tokens).is_err());
    }

    #[test]
    fn test_slice_and_subscript() {
        let stmt = parse("RETURN [1,2,3][0], [1,2,3][1..2]");
        let Statement::Query(q) = stmt else { panic!() };
        let items = q.return_clause.unwrap().items;
        assert!(matches!(items[0].expr, Expr::Subscript { .. }));
        assert!(matches!(items[1].expr, Expr::Slice { .. }));
    }

    #[test]
    fn test_optional_match() {
        let stmt = parse("MATCH (n) OPTIONAL MATCH (n)-[:R]->(m) RETURN n, m");
        let Statement::Query(q) = stmt else { panic!() };
        assert_eq!(q.clauses.len(), 2);
        let Clause::Match(m) = &q.clauses[1] else { panic!() };
        assert!(m.optional);
    }

    #[test]
    fn test_detach_delete() {
        let stmt = parse("MATCH (n) DETACH DELETE n");
        let Statement::Query(q) = stmt else { panic!() };
        let Clause::Delete { detach, .. } = &q.clauses[1] else { panic!() };
        assert!(detach);
    }
}
