//! Single-pass IR parser and graph builder.

use std::io::BufRead;

use tracing::debug;

use crate::error::{EntityKind, PolicyError, PolicyResult};
use crate::ext::Extensions;
use crate::graph::{
    ActionHandle, ActionNode, Block, Bucket, Class, ClassId, Context, Direction, Field, GroupRef,
    Match, OffsetGroup, Param, Qdisc, QdiscHandle, Rule,
};

use super::lex;

/// Parser state threaded through the single left-to-right pass.
///
/// The "current" block and qdisc cursors are explicit fields rather than
/// process-wide state; the current qdisc advances only on explicit `qdisc`
/// records, never on placeholders synthesized by forward references.
#[derive(Debug)]
pub struct IrParser {
    ctx: Context,
    cur_block: Option<usize>,
    cur_qdisc: Option<QdiscHandle>,
    line_no: usize,
}

impl Default for IrParser {
    fn default() -> Self {
        Self::new()
    }
}

impl IrParser {
    /// Creates a parser with an empty context.
    pub fn new() -> Self {
        Self {
            ctx: Context::new(),
            cur_block: None,
            cur_qdisc: None,
            line_no: 0,
        }
    }

    /// Parses a complete IR text.
    pub fn parse_str(input: &str) -> PolicyResult<Context> {
        let mut parser = Self::new();
        for line in input.lines() {
            parser.feed(line)?;
        }
        parser.finish()
    }

    /// Parses a complete IR stream.
    pub fn parse_reader<R: BufRead>(reader: R) -> PolicyResult<Context> {
        let mut parser = Self::new();
        for line in reader.lines() {
            parser.feed(&line?)?;
        }
        parser.finish()
    }

    /// Consumes one input line. Fails fatally on the first malformed
    /// record; the parser must not be fed further after an error.
    pub fn feed(&mut self, line: &str) -> PolicyResult<()> {
        self.line_no += 1;
        let text = lex::strip_comment(line);
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let Some((&keyword, rest)) = tokens.split_first() else {
            return Ok(());
        };
        match keyword {
            "pragma" => {
                self.ctx
                    .pragmas
                    .extend(rest.iter().map(|&w| w.to_string()));
                Ok(())
            }
            "block" => self.parse_block(text, rest),
            "qdisc" => self.parse_qdisc(text, rest),
            "class" => self.parse_class(text, rest),
            "offset" => self.parse_offset(text, rest),
            "bucket" => self.parse_bucket(text, rest),
            "action" => self.parse_action(text, rest),
            "match" => self.parse_match(text, rest),
            "barrier" => self.parse_barrier(text, rest),
            _ => Err(self.malformed(text, format!("unknown record keyword '{}'", keyword))),
        }
    }

    /// Validates the built graph and hands it over.
    pub fn finish(self) -> PolicyResult<Context> {
        self.ctx.validate_action_graphs()?;
        debug!(
            blocks = self.ctx.blocks().len(),
            buckets = self.ctx.buckets().len(),
            offset_groups = self.ctx.offset_groups().len(),
            "policy graph built"
        );
        Ok(self.ctx)
    }

    fn malformed(&self, line: &str, reason: impl Into<String>) -> PolicyError {
        PolicyError::malformed(self.line_no, line.trim(), reason)
    }

    fn require_block(&self, line: &str) -> PolicyResult<usize> {
        self.cur_block
            .ok_or_else(|| self.malformed(line, "record outside of a block"))
    }

    fn parse_block(&mut self, line: &str, tokens: &[&str]) -> PolicyResult<()> {
        let (head, pragmas) = lex::split_pragma(tokens);
        let [name, dir] = head else {
            return Err(self.malformed(line, "expected 'block <name> ingress|egress'"));
        };
        let direction = Direction::parse(dir)
            .ok_or_else(|| self.malformed(line, format!("unknown direction '{}'", dir)))?;
        if self.ctx.find_block(name, direction).is_some() {
            return Err(PolicyError::DuplicateBlock {
                name: name.to_string(),
                direction: direction.to_string(),
            });
        }
        let mut block = Block::new(name.to_string(), direction);
        block.pragmas = pragmas;
        debug!(block = %block.location, "opened block");
        self.cur_block = Some(self.ctx.push_block(block));
        self.cur_qdisc = None;
        Ok(())
    }

    fn parse_qdisc(&mut self, line: &str, tokens: &[&str]) -> PolicyResult<()> {
        let block_at = self.require_block(line)?;
        let (head, pragmas) = lex::split_pragma(tokens);
        let (&[idx, eq, kind], params) = head.split_at(3.min(head.len())) else {
            return Err(self.malformed(line, "expected 'qdisc <idx> = <type> ...'"));
        };
        if eq != "=" {
            return Err(self.malformed(line, "expected '=' after qdisc index"));
        }
        let index = lex::parse_u32(idx)
            .ok_or_else(|| self.malformed(line, format!("bad qdisc index '{}'", idx)))?;
        let params = self.parse_params(line, params)?;

        let block = self.ctx.block_mut(block_at);
        if block.find_qdisc(index).is_some() {
            return Err(PolicyError::duplicate(
                EntityKind::Qdisc,
                index,
                block.location.clone(),
            ));
        }
        let location = format!("{} qdisc {}", block.location, index);
        let mut qdisc = Qdisc::new(index, Some(kind.to_string()), location);
        qdisc.params = params;
        qdisc.pragmas = pragmas;
        self.cur_qdisc = Some(block.push_qdisc(qdisc));
        Ok(())
    }

    fn parse_class(&mut self, line: &str, tokens: &[&str]) -> PolicyResult<()> {
        let block_at = self.require_block(line)?;
        let qdisc_at = self
            .cur_qdisc
            .ok_or_else(|| self.malformed(line, "class record before any qdisc"))?;
        let (head, pragmas) = lex::split_pragma(tokens);
        let (&[idx, eq], params) = head.split_at(2.min(head.len())) else {
            return Err(self.malformed(line, "expected 'class <idx> = ...'"));
        };
        if eq != "=" {
            return Err(self.malformed(line, "expected '=' after class index"));
        }
        let index = lex::parse_u32(idx)
            .ok_or_else(|| self.malformed(line, format!("bad class index '{}'", idx)))?;
        let mut params = self.parse_params(line, params)?;

        // The reserved `parent` and `qdisc` parameters are structure, not
        // qdisc-type configuration.
        let parent = self.take_index_param(line, &mut params, "parent")?;
        let child_qdisc = self.take_index_param(line, &mut params, "qdisc")?;

        if let Some(child) = child_qdisc {
            if self.ctx.blocks()[block_at].find_qdisc(child).is_none() {
                return Err(PolicyError::unknown(
                    EntityKind::Qdisc,
                    child,
                    self.ctx.blocks()[block_at].location.clone(),
                ));
            }
        }

        let block = self.ctx.block_mut(block_at);
        let qdisc = block.qdisc_mut(qdisc_at);
        if qdisc.find_class(index).is_some() {
            return Err(PolicyError::duplicate(
                EntityKind::Class,
                index,
                qdisc.location.clone(),
            ));
        }
        let parent_at = match parent {
            Some(parent_idx) => Some(qdisc.find_class(parent_idx).ok_or_else(|| {
                PolicyError::unknown(EntityKind::Class, parent_idx, qdisc.location.clone())
            })?),
            None => None,
        };

        let location = format!("{} class {}", qdisc.location, index);
        let mut class = Class::new(index, location);
        class.params = params;
        class.pragmas = pragmas;
        class.child_qdisc = child_qdisc;
        qdisc.push_class(class, parent_at);
        Ok(())
    }

    fn parse_offset(&mut self, line: &str, tokens: &[&str]) -> PolicyResult<()> {
        let [idx, eq, expr, shl, shift] = tokens else {
            return Err(self.malformed(line, "expected 'offset <idx> = <base>+(<field>) << <shift>'"));
        };
        if *eq != "=" || *shl != "<<" {
            return Err(self.malformed(line, "expected 'offset <idx> = <base>+(<field>) << <shift>'"));
        }
        let index = lex::parse_u32(idx)
            .ok_or_else(|| self.malformed(line, format!("bad offset group index '{}'", idx)))?;
        if index == 0 {
            return Err(self.malformed(line, "offset group 0 is reserved for the packet root"));
        }
        if self.ctx.find_offset_group(index).is_some() {
            return Err(PolicyError::duplicate(
                EntityKind::OffsetGroup,
                index,
                "context".to_string(),
            ));
        }
        let location = format!("offset {}", index);
        let (base, field) = lex::split_offset_expr(expr)
            .ok_or_else(|| self.malformed(line, format!("bad offset expression '{}'", expr)))?;
        let base = self.parse_group_ref(line, base, &location)?;
        let field = self.parse_field_spec(line, field, &location)?;
        let shift = lex::parse_u32(shift)
            .ok_or_else(|| self.malformed(line, format!("bad shift '{}'", shift)))?;
        if shift > 31 {
            return Err(self.malformed(line, "shift must be at most 31"));
        }
        self.ctx.push_offset_group(OffsetGroup {
            index,
            base,
            field,
            shift,
            location,
        });
        Ok(())
    }

    fn parse_bucket(&mut self, line: &str, tokens: &[&str]) -> PolicyResult<()> {
        let [idx, eq, rate, mpu, depth, initial, overflow] = tokens else {
            return Err(self.malformed(
                line,
                "expected 'bucket <idx> = <rate> <mpu> <depth> <initial> <overflow>'",
            ));
        };
        if *eq != "=" {
            return Err(self.malformed(line, "expected '=' after bucket index"));
        }
        let index = lex::parse_u32(idx)
            .ok_or_else(|| self.malformed(line, format!("bad bucket index '{}'", idx)))?;
        if self.ctx.find_bucket(index).is_some() {
            return Err(PolicyError::duplicate(
                EntityKind::Bucket,
                index,
                "context".to_string(),
            ));
        }
        let mut numbers = [0u64; 4];
        for (slot, token) in numbers.iter_mut().zip([rate, mpu, depth, initial]) {
            *slot = lex::parse_u64(token)
                .ok_or_else(|| self.malformed(line, format!("bad bucket parameter '{}'", token)))?;
        }
        let overflow = lex::parse_u32(overflow)
            .ok_or_else(|| self.malformed(line, format!("bad overflow index '{}'", overflow)))?;
        self.ctx.push_bucket(Bucket {
            index,
            rate: numbers[0],
            mpu: numbers[1],
            depth: numbers[2],
            initial_tokens: numbers[3],
            overflow: (overflow != 0).then_some(overflow),
            location: format!("bucket {}", index),
            ext: Extensions::new(),
        });
        Ok(())
    }

    fn parse_action(&mut self, line: &str, tokens: &[&str]) -> PolicyResult<()> {
        let block_at = self.require_block(line)?;
        let Some((&idx, rest)) = tokens.split_first() else {
            return Err(self.malformed(line, "expected 'action <idx> = <expr>'"));
        };
        let Some((&"=", expr)) = rest.split_first() else {
            return Err(self.malformed(line, "expected '=' after action index"));
        };
        let index = lex::parse_u32(idx)
            .ok_or_else(|| self.malformed(line, format!("bad action index '{}'", idx)))?;
        if self.ctx.blocks()[block_at].find_action(index).is_some() {
            return Err(PolicyError::duplicate(
                EntityKind::Action,
                index,
                self.ctx.blocks()[block_at].location.clone(),
            ));
        }
        let mut pos = 0;
        let handle = self.parse_action_expr(line, block_at, expr, &mut pos)?;
        if pos != expr.len() {
            return Err(self.malformed(line, "trailing tokens after action expression"));
        }
        self.ctx.block_mut(block_at).register_action(index, handle);
        Ok(())
    }

    fn parse_action_expr(
        &mut self,
        line: &str,
        block_at: usize,
        tokens: &[&str],
        pos: &mut usize,
    ) -> PolicyResult<ActionHandle> {
        let keyword = self.next_token(line, tokens, pos, "action expression")?;
        match keyword {
            "drop" => Ok(self.ctx.block_mut(block_at).push_action(ActionNode::Drop)),
            "unspec" => Ok(self.ctx.block_mut(block_at).push_action(ActionNode::Unspec)),
            "action" => {
                let idx_tok = self.next_token(line, tokens, pos, "action back-reference")?;
                let index = lex::parse_u32(idx_tok).ok_or_else(|| {
                    self.malformed(line, format!("bad action index '{}'", idx_tok))
                })?;
                let block = &self.ctx.blocks()[block_at];
                block.find_action(index).ok_or_else(|| {
                    PolicyError::unknown(EntityKind::Action, index, block.location.clone())
                })
            }
            "class" => {
                let list_tok = self.next_token(line, tokens, pos, "class list")?;
                let mut entries = Vec::new();
                for entry in list_tok.split(',') {
                    let (qdisc, class) = entry.split_once(':').ok_or_else(|| {
                        self.malformed(line, format!("bad class reference '{}'", entry))
                    })?;
                    let qdisc = lex::parse_u32(qdisc).ok_or_else(|| {
                        self.malformed(line, format!("bad qdisc index '{}'", qdisc))
                    })?;
                    let class = lex::parse_u32(class).ok_or_else(|| {
                        self.malformed(line, format!("bad class index '{}'", class))
                    })?;
                    entries.push(self.ensure_class(block_at, qdisc, class));
                }
                Ok(self
                    .ctx
                    .block_mut(block_at)
                    .push_action(ActionNode::Class(entries)))
            }
            "conform" => {
                let bucket = self.parse_bucket_ref(line, block_at, tokens, pos)?;
                let yes = self.parse_action_expr(line, block_at, tokens, pos)?;
                let no = self.parse_action_expr(line, block_at, tokens, pos)?;
                Ok(self
                    .ctx
                    .block_mut(block_at)
                    .push_action(ActionNode::Conform { bucket, yes, no }))
            }
            "count" => {
                let bucket = self.parse_bucket_ref(line, block_at, tokens, pos)?;
                let next = self.parse_action_expr(line, block_at, tokens, pos)?;
                Ok(self
                    .ctx
                    .block_mut(block_at)
                    .push_action(ActionNode::Count { bucket, next }))
            }
            other => Err(self.malformed(line, format!("unknown action keyword '{}'", other))),
        }
    }

    fn parse_bucket_ref(
        &self,
        line: &str,
        block_at: usize,
        tokens: &[&str],
        pos: &mut usize,
    ) -> PolicyResult<usize> {
        let idx_tok = self.next_token(line, tokens, pos, "bucket reference")?;
        let index = lex::parse_u32(idx_tok)
            .ok_or_else(|| self.malformed(line, format!("bad bucket index '{}'", idx_tok)))?;
        self.ctx.find_bucket(index).ok_or_else(|| {
            PolicyError::unknown(
                EntityKind::Bucket,
                index,
                self.ctx.blocks()[block_at].location.clone(),
            )
        })
    }

    /// Resolves a `(qdisc, class)` pair, synthesizing placeholders for
    /// not-yet-defined targets so the single pass never blocks on
    /// definition order.
    fn ensure_class(&mut self, block_at: usize, qdisc_idx: u32, class_idx: u32) -> ClassId {
        let block = self.ctx.block_mut(block_at);
        let qdisc_at = match block.find_qdisc(qdisc_idx) {
            Some(at) => at,
            None => {
                let location = format!("{} qdisc {}", block.location, qdisc_idx);
                debug!(%location, "fudging placeholder qdisc for forward reference");
                block.push_qdisc(Qdisc::new(qdisc_idx, None, location))
            }
        };
        let qdisc = block.qdisc_mut(qdisc_at);
        if qdisc.find_class(class_idx).is_none() {
            let location = format!("{} class {}", qdisc.location, class_idx);
            debug!(%location, "fudging placeholder class for forward reference");
            qdisc.push_class(Class::new(class_idx, location), None);
        }
        ClassId::new(qdisc_idx, class_idx)
    }

    fn parse_match(&mut self, line: &str, tokens: &[&str]) -> PolicyResult<()> {
        let block_at = self.require_block(line)?;
        let block_location = self.ctx.blocks()[block_at].location.clone();
        let mut matches = Vec::new();
        let mut iter = tokens.iter();
        let action = loop {
            match iter.next() {
                Some(&"action") => {
                    let idx_tok = iter
                        .next()
                        .ok_or_else(|| self.malformed(line, "missing action index"))?;
                    let index = lex::parse_u32(idx_tok).ok_or_else(|| {
                        self.malformed(line, format!("bad action index '{}'", idx_tok))
                    })?;
                    break self.ctx.blocks()[block_at].find_action(index).ok_or_else(
                        || PolicyError::unknown(EntityKind::Action, index, block_location.clone()),
                    )?;
                }
                Some(token) => {
                    let (field_tok, value_tok) = token.split_once('=').ok_or_else(|| {
                        self.malformed(line, format!("bad match '{}', expected <field>=<value>", token))
                    })?;
                    let field = self.parse_field_spec(line, field_tok, &block_location)?;
                    let value = lex::parse_u32(value_tok).ok_or_else(|| {
                        self.malformed(line, format!("bad match value '{}'", value_tok))
                    })?;
                    if field.length < 32 && value >= 1 << field.length {
                        return Err(self.malformed(
                            line,
                            format!("match value {:#x} wider than {}-bit field", value, field.length),
                        ));
                    }
                    matches.push(Match { field, value });
                }
                None => return Err(self.malformed(line, "match record without an action")),
            }
        };
        if iter.next().is_some() {
            return Err(self.malformed(line, "trailing tokens after action reference"));
        }
        if matches.is_empty() {
            return Err(self.malformed(line, "match record needs at least one match"));
        }
        self.ctx.block_mut(block_at).rules.push(Rule {
            matches,
            action: Some(action),
        });
        Ok(())
    }

    fn parse_barrier(&mut self, line: &str, tokens: &[&str]) -> PolicyResult<()> {
        let block_at = self.require_block(line)?;
        if !tokens.is_empty() {
            return Err(self.malformed(line, "barrier record takes no parameters"));
        }
        self.ctx.block_mut(block_at).rules.push(Rule {
            matches: Vec::new(),
            action: None,
        });
        Ok(())
    }

    fn parse_params(&self, line: &str, tokens: &[&str]) -> PolicyResult<Vec<Param>> {
        let mut params = Vec::with_capacity(tokens.len() / 2);
        for pair in tokens.chunks(2) {
            let [name, value] = pair else {
                return Err(self.malformed(line, format!("parameter '{}' without a value", pair[0])));
            };
            let value = lex::parse_u64(value).ok_or_else(|| {
                self.malformed(line, format!("bad value '{}' for parameter '{}'", value, name))
            })?;
            params.push(Param::new(*name, value));
        }
        Ok(params)
    }

    /// Extracts a reserved index-valued parameter from a parsed list.
    fn take_index_param(
        &self,
        line: &str,
        params: &mut Vec<Param>,
        name: &str,
    ) -> PolicyResult<Option<u32>> {
        let Some(at) = params.iter().position(|p| p.name == name) else {
            return Ok(None);
        };
        let param = params.remove(at);
        let index = u32::try_from(param.value).map_err(|_| {
            self.malformed(line, format!("'{}' index {} out of range", name, param.value))
        })?;
        Ok(Some(index))
    }

    fn parse_group_ref(&self, line: &str, token: &str, scope: &str) -> PolicyResult<GroupRef> {
        match token {
            "0" => Ok(GroupRef::Absolute),
            "meta" => Ok(GroupRef::Meta),
            _ => {
                let index = lex::parse_u32(token).ok_or_else(|| {
                    self.malformed(line, format!("bad offset group reference '{}'", token))
                })?;
                // Offset groups must be fully defined before use.
                let handle = self.ctx.find_offset_group(index).ok_or_else(|| {
                    PolicyError::unknown(EntityKind::OffsetGroup, index, scope.to_string())
                })?;
                Ok(GroupRef::Group(handle))
            }
        }
    }

    fn parse_field_spec(&self, line: &str, token: &str, scope: &str) -> PolicyResult<Field> {
        let (base, offset, length) = lex::split_field(token).ok_or_else(|| {
            self.malformed(line, format!("bad field '{}', expected base:offset:length", token))
        })?;
        let group = self.parse_group_ref(line, base, scope)?;
        let offset = lex::parse_u32(offset)
            .ok_or_else(|| self.malformed(line, format!("bad field offset '{}'", offset)))?;
        let length = lex::parse_u32(length)
            .ok_or_else(|| self.malformed(line, format!("bad field length '{}'", length)))?;
        if length == 0 || length > crate::codec::MAX_FIELD_BITS {
            return Err(self.malformed(line, format!("field length {} not in 1..=32", length)));
        }
        Ok(Field {
            group,
            offset,
            length,
        })
    }

    fn next_token<'t>(
        &self,
        line: &str,
        tokens: &[&'t str],
        pos: &mut usize,
        what: &str,
    ) -> PolicyResult<&'t str> {
        let token = tokens
            .get(*pos)
            .ok_or_else(|| self.malformed(line, format!("truncated {}", what)))?;
        *pos += 1;
        Ok(token)
    }
}
