//! Opcode dispatch tables and scoped stream readers.
//!
//! DVI opcodes come in runs: a declaration at opcode `a` implicitly
//! claims every opcode up to the next declaration, and the handler
//! receives a 1-based offset into that run (0 for a singleton). The
//! offset doubles as the operand-width or inline-parameter convention —
//! `right1..right4` share one handler whose offset is the byte count,
//! `set_char_0..127` share one whose offset is the character code.
//!
//! Readers are the loop half: they pull opcodes, enforce an allow or
//! deny set, dispatch, and stop after an opcode in the terminal set.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cursor::ByteSource;
use crate::error::{DviError, DviResult};
use crate::state::{DviState, PageHandler};

/// An opcode handler.
///
/// `offset` is the position of the dispatched opcode within its
/// declaration's run (see module docs). The handler reads its own
/// operands from `src` and reports events through `handler`.
pub type Handler =
    fn(offset: u32, src: &mut dyn ByteSource, state: &mut DviState, handler: &mut dyn PageHandler) -> DviResult<()>;

/// One (range-start, handler) declaration.
///
/// `name` identifies the handler in reader allow/deny/terminal sets;
/// several declarations may share a name (and handler) to stitch a
/// singleton entry onto the front of a run.
#[derive(Debug, Clone, Copy)]
pub struct Declaration {
    /// First opcode of the claimed run.
    pub start: u8,
    /// Handler name for reverse lookup.
    pub name: &'static str,
    /// Bound handler.
    pub handler: Handler,
}

#[derive(Clone, Copy)]
struct Entry {
    handler: Handler,
    offset: u32,
}

struct DispatchTable {
    entries: [Option<Entry>; 256],
}

/// A set of opcodes, used for allow/deny/terminal filtering.
#[derive(Clone)]
pub struct OpcodeSet([bool; 256]);

impl Default for OpcodeSet {
    fn default() -> Self {
        Self([false; 256])
    }
}

impl OpcodeSet {
    /// Whether `opcode` is in the set.
    #[must_use]
    pub const fn contains(&self, opcode: u8) -> bool {
        self.0[opcode as usize]
    }

    fn insert(&mut self, opcode: u8) {
        self.0[opcode as usize] = true;
    }

    fn union_with(&mut self, other: &Self) {
        for (slot, on) in self.0.iter_mut().zip(other.0.iter()) {
            *slot |= on;
        }
    }
}

/// Immutable dispatch table plus the handler-name → opcode-set lookup.
pub struct Dispatcher {
    table: Arc<DispatchTable>,
    lookup: HashMap<&'static str, OpcodeSet>,
}

impl Dispatcher {
    /// Expand sparse declarations into a dense table.
    ///
    /// The final declaration claims through opcode 255.
    ///
    /// # Errors
    ///
    /// [`DviError::DuplicateOpcode`] when two declarations share a start
    /// opcode. This is a configuration bug, surfaced at build time.
    pub fn build(declarations: &[Declaration]) -> DviResult<Self> {
        let mut decls = declarations.to_vec();
        decls.sort_by_key(|d| d.start);

        let mut entries: [Option<Entry>; 256] = [None; 256];
        let mut lookup: HashMap<&'static str, OpcodeSet> = HashMap::new();

        for (i, decl) in decls.iter().enumerate() {
            let start = u16::from(decl.start);
            let end = decls.get(i + 1).map_or(256, |next| u16::from(next.start));
            if end == start {
                return Err(DviError::DuplicateOpcode(decl.start));
            }
            let width = end - start;
            let owned = lookup.entry(decl.name).or_default();
            for (run_pos, opcode) in (start..end).enumerate() {
                // Singleton runs pass offset 0; wider runs 1..=width.
                let offset = if width == 1 { 0 } else { run_pos as u32 + 1 };
                entries[opcode as usize] = Some(Entry {
                    handler: decl.handler,
                    offset,
                });
                owned.insert(opcode as u8);
            }
        }

        Ok(Self {
            table: Arc::new(DispatchTable { entries }),
            lookup,
        })
    }

    /// Opcodes owned by the named handlers, unioned.
    fn opcodes_of(&self, names: &[&str]) -> DviResult<OpcodeSet> {
        let mut set = OpcodeSet::default();
        for name in names {
            let owned = self
                .lookup
                .get(name)
                .ok_or_else(|| DviError::UnknownHandler((*name).to_owned()))?;
            set.union_with(owned);
        }
        Ok(set)
    }

    /// Reader that requires every opcode to belong to the named handlers
    /// and stops after dispatching an opcode of an `end_on` handler.
    ///
    /// # Errors
    ///
    /// [`DviError::UnknownHandler`] for a name with no declaration.
    pub fn allow_reader(&self, allow: &[&str], end_on: &[&str]) -> DviResult<Reader> {
        Ok(Reader {
            table: Arc::clone(&self.table),
            filter: Filter::Allow(self.opcodes_of(allow)?),
            end: self.opcodes_of(end_on)?,
        })
    }

    /// Reader that rejects opcodes of the named handlers and stops after
    /// dispatching an opcode of an `end_on` handler.
    ///
    /// # Errors
    ///
    /// [`DviError::UnknownHandler`] for a name with no declaration.
    pub fn deny_reader(&self, deny: &[&str], end_on: &[&str]) -> DviResult<Reader> {
        Ok(Reader {
            table: Arc::clone(&self.table),
            filter: Filter::Deny(self.opcodes_of(deny)?),
            end: self.opcodes_of(end_on)?,
        })
    }
}

#[derive(Clone)]
enum Filter {
    Allow(OpcodeSet),
    Deny(OpcodeSet),
}

/// A scoped loop-dispatcher over one opcode stream.
///
/// Cheap to clone (the table is shared); the virtual-font sub-render
/// clones the page reader to re-enter it against a packet cursor.
#[derive(Clone)]
pub struct Reader {
    table: Arc<DispatchTable>,
    filter: Filter,
    end: OpcodeSet,
}

impl Reader {
    /// Dispatch opcodes until one in the terminal set has been handled.
    ///
    /// # Errors
    ///
    /// Filter violations ([`DviError::UnexpectedOpcode`] /
    /// [`DviError::ForbiddenOpcode`]), [`DviError::UndefinedOpcode`] for
    /// unmapped opcodes, plus whatever the dispatched handlers raise.
    pub fn run(
        &self,
        src: &mut dyn ByteSource,
        state: &mut DviState,
        handler: &mut dyn PageHandler,
    ) -> DviResult<()> {
        loop {
            let opcode = src.next_byte()?;
            match &self.filter {
                Filter::Allow(set) if !set.contains(opcode) => {
                    return Err(DviError::UnexpectedOpcode(opcode));
                }
                Filter::Deny(set) if set.contains(opcode) => {
                    return Err(DviError::ForbiddenOpcode(opcode));
                }
                _ => {}
            }
            let entry = self.table.entries[opcode as usize]
                .ok_or(DviError::UndefinedOpcode(opcode))?;
            (entry.handler)(entry.offset, src, state, handler)?;
            if self.end.contains(opcode) {
                return Ok(());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
