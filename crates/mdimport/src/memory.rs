//! In-memory reference import.
//!
//! [`MemoryImport`] implements [`MetadataImport`] over a [`MetadataModel`]
//! held in memory. It follows the paging contract of the native enumerators
//! (lazy handle creation, `0` at exhaustion, count independent of progress,
//! reset to an offset) and records handle bookkeeping in [`EnumStats`] so
//! tests can assert that every handle is closed exactly once. A
//! [`FaultPlan`] injects failure statuses and protocol violations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::HarnessError;
use crate::import::{Dispenser, EnumKind, EnumQuery, Flavor, MetadataImport, RawEnum};
use crate::token::{Status, Token, table};

/// A method definition and its parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodDef {
    pub token: Token,
    pub params: Vec<Token>,
}

impl MethodDef {
    pub const fn new(token: Token) -> Self {
        Self {
            token,
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: impl IntoIterator<Item = Token>) -> Self {
        self.params.extend(params);
        self
    }
}

/// A type definition and everything enumerated beneath it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeDef {
    pub token: Token,
    pub interface_impls: Vec<Token>,
    pub methods: Vec<MethodDef>,
    pub fields: Vec<Token>,
    pub properties: Vec<Token>,
    pub events: Vec<Token>,
}

impl TypeDef {
    pub const fn new(token: Token) -> Self {
        Self {
            token,
            interface_impls: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    #[must_use]
    pub fn with_field(mut self, field: Token) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn with_interface_impl(mut self, implementation: Token) -> Self {
        self.interface_impls.push(implementation);
        self
    }

    #[must_use]
    pub fn with_property(mut self, property: Token) -> Self {
        self.properties.push(property);
        self
    }

    #[must_use]
    pub fn with_event(mut self, event: Token) -> Self {
        self.events.push(event);
        self
    }

    /// Methods followed by fields.
    pub fn members(&self) -> Vec<Token> {
        self.methods
            .iter()
            .map(|m| m.token)
            .chain(self.fields.iter().copied())
            .collect()
    }
}

/// Contents of one metadata scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataModel {
    pub types: Vec<TypeDef>,
    pub type_refs: Vec<Token>,
    pub type_specs: Vec<Token>,
    pub module_refs: Vec<Token>,
    pub user_strings: Vec<Token>,
    /// Standalone signature tokens, in enumeration order.
    pub signatures: Vec<Token>,
    /// Signature blobs by owning token (signature, method, field or type spec).
    pub blobs: BTreeMap<Token, Vec<u8>>,
}

impl MetadataModel {
    /// A deterministic model with `types` type definitions.
    ///
    /// Type rows start at 2 (row 1 is the `<Module>` pseudo-type, which the
    /// native enumerator skips). Every type gets `methods` methods with
    /// `params` parameters each and `fields` fields, plus one type
    /// reference, one user string and one standalone signature. Methods,
    /// fields and signatures carry blobs.
    pub fn synthetic(types: usize, methods: usize, params: usize, fields: usize) -> Self {
        let mut model = Self::default();
        let mut rows = RowAllocator::default();

        for _ in 0..types {
            let mut ty = TypeDef::new(rows.next(table::TYPE_DEF));
            for _ in 0..methods {
                let method = MethodDef::new(rows.next(table::METHOD_DEF))
                    .with_params((0..params).map(|_| rows.next(table::PARAM_DEF)));
                model.blobs.insert(method.token, method_blob(params));
                ty = ty.with_method(method);
            }
            for _ in 0..fields {
                let field = rows.next(table::FIELD_DEF);
                model.blobs.insert(field, vec![0x06, 0x08]);
                ty = ty.with_field(field);
            }
            model.types.push(ty);

            model.type_refs.push(rows.next(table::TYPE_REF));
            model.user_strings.push(rows.next(table::USER_STRING));
            let signature = rows.next(table::SIGNATURE);
            model.blobs.insert(signature, vec![0x07, 0x01, 0x08]);
            model.signatures.push(signature);
        }
        model
    }

    /// Items produced by one enumeration, in order.
    ///
    /// An unknown scope yields an empty enumeration.
    pub fn items(&self, query: EnumQuery) -> Vec<Token> {
        let ty = |scope: Token| self.types.iter().find(|t| t.token == scope);
        match query {
            EnumQuery::TypeDefs => self.types.iter().map(|t| t.token).collect(),
            EnumQuery::TypeRefs => self.type_refs.clone(),
            EnumQuery::TypeSpecs => self.type_specs.clone(),
            EnumQuery::ModuleRefs => self.module_refs.clone(),
            EnumQuery::Signatures => self.signatures.clone(),
            EnumQuery::UserStrings => self.user_strings.clone(),
            EnumQuery::InterfaceImpls(scope) => {
                ty(scope).map(|t| t.interface_impls.clone()).unwrap_or_default()
            }
            EnumQuery::Methods(scope) => ty(scope)
                .map(|t| t.methods.iter().map(|m| m.token).collect())
                .unwrap_or_default(),
            EnumQuery::Fields(scope) => ty(scope).map(|t| t.fields.clone()).unwrap_or_default(),
            EnumQuery::Members(scope) => ty(scope).map(TypeDef::members).unwrap_or_default(),
            EnumQuery::Properties(scope) => {
                ty(scope).map(|t| t.properties.clone()).unwrap_or_default()
            }
            EnumQuery::Events(scope) => ty(scope).map(|t| t.events.clone()).unwrap_or_default(),
            EnumQuery::Params(scope) => self
                .types
                .iter()
                .flat_map(|t| &t.methods)
                .find(|m| m.token == scope)
                .map(|m| m.params.clone())
                .unwrap_or_default(),
        }
    }
}

fn method_blob(params: usize) -> Vec<u8> {
    let count = u8::try_from(params).unwrap_or(u8::MAX);
    let mut blob = vec![0x20, count, 0x01];
    blob.extend(std::iter::repeat_n(0x08, usize::from(count)));
    blob
}

#[derive(Default)]
struct RowAllocator {
    next: HashMap<u8, u32>,
}

impl RowAllocator {
    fn next(&mut self, table: u8) -> Token {
        let first = if table == table::TYPE_DEF { 2 } else { 1 };
        let rid = self.next.entry(table).or_insert(first);
        let token = Token::from_parts(table, *rid);
        *rid += 1;
        token
    }
}

/// Failures and protocol violations to inject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Fail opening the scope.
    pub open: Option<Status>,
    /// Fail every page call of this kind (after the handle is created).
    pub paging: Option<(EnumKind, Status)>,
    /// Add this amount to the count reported for this kind.
    pub count_skew: Option<(EnumKind, i32)>,
    /// Fail every reset.
    pub reset: Option<Status>,
    /// Fail every signature lookup.
    pub lookup: Option<Status>,
    /// Report one more item than was written for this kind.
    pub page_overrun: Option<EnumKind>,
}

/// Handle bookkeeping for one import (or every import of a dispenser).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnumStats {
    /// Handles created by a first page call.
    pub opened: usize,
    /// Handles released.
    pub closed: usize,
    /// Close calls for a handle that was already released.
    pub double_closes: usize,
    /// Page, count or reset calls for a handle that is not open.
    pub unknown_handle_calls: usize,
    /// Successful reset calls.
    pub resets: usize,
}

struct OpenEnum {
    kind: EnumKind,
    items: Vec<Token>,
    position: usize,
}

#[derive(Default)]
struct EnumTable {
    next_handle: usize,
    open: HashMap<usize, OpenEnum>,
}

/// [`MetadataImport`] over a [`MetadataModel`].
pub struct MemoryImport {
    model: Arc<MetadataModel>,
    faults: FaultPlan,
    enums: Mutex<EnumTable>,
    stats: Arc<Mutex<EnumStats>>,
}

impl MemoryImport {
    pub fn new(model: MetadataModel) -> Self {
        Self::with_faults(model, FaultPlan::default())
    }

    pub fn with_faults(model: MetadataModel, faults: FaultPlan) -> Self {
        Self::shared(Arc::new(model), faults, Arc::default())
    }

    fn shared(model: Arc<MetadataModel>, faults: FaultPlan, stats: Arc<Mutex<EnumStats>>) -> Self {
        Self {
            model,
            faults,
            enums: Mutex::new(EnumTable::default()),
            stats,
        }
    }

    pub fn model(&self) -> &MetadataModel {
        &self.model
    }

    /// Snapshot of the handle bookkeeping.
    pub fn stats(&self) -> EnumStats {
        *self.stats.lock()
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.enums.lock().open.len()
    }

    fn unknown_handle(&self) -> Status {
        self.stats.lock().unknown_handle_calls += 1;
        Status::E_INVALIDARG
    }
}

impl MetadataImport for MemoryImport {
    fn enum_page(
        &self,
        handle: &mut RawEnum,
        query: EnumQuery,
        buffer: &mut [Token],
    ) -> Result<usize, Status> {
        let mut enums = self.enums.lock();
        if !handle.is_opened() {
            enums.next_handle += 1;
            let id = enums.next_handle;
            enums.open.insert(
                id,
                OpenEnum {
                    kind: query.kind(),
                    items: self.model.items(query),
                    position: 0,
                },
            );
            *handle = RawEnum::from_raw(id);
            self.stats.lock().opened += 1;
            trace!(%query, handle = id, "memory enum opened");
        }

        let Some(state) = enums.open.get_mut(&handle.as_raw()) else {
            drop(enums);
            return Err(self.unknown_handle());
        };
        if let Some((kind, status)) = self.faults.paging {
            if kind == state.kind {
                return Err(status);
            }
        }

        let remaining = &state.items[state.position.min(state.items.len())..];
        let written = remaining.len().min(buffer.len());
        buffer[..written].copy_from_slice(&remaining[..written]);
        state.position += written;

        if self.faults.page_overrun == Some(state.kind) && written > 0 {
            return Ok(written + 1);
        }
        Ok(written)
    }

    fn count_enum(&self, handle: RawEnum) -> Result<u32, Status> {
        let enums = self.enums.lock();
        let Some(state) = enums.open.get(&handle.as_raw()) else {
            drop(enums);
            return Err(self.unknown_handle());
        };
        let mut count = i64::try_from(state.items.len()).unwrap_or(i64::MAX);
        if let Some((kind, skew)) = self.faults.count_skew {
            if kind == state.kind {
                count += i64::from(skew);
            }
        }
        Ok(u32::try_from(count.max(0)).unwrap_or(u32::MAX))
    }

    fn reset_enum(&self, handle: RawEnum, position: u32) -> Result<(), Status> {
        if let Some(status) = self.faults.reset {
            return Err(status);
        }
        let mut enums = self.enums.lock();
        let Some(state) = enums.open.get_mut(&handle.as_raw()) else {
            drop(enums);
            return Err(self.unknown_handle());
        };
        state.position = usize::try_from(position).unwrap_or(usize::MAX);
        self.stats.lock().resets += 1;
        Ok(())
    }

    fn close_enum(&self, handle: RawEnum) {
        let removed = self.enums.lock().open.remove(&handle.as_raw());
        let mut stats = self.stats.lock();
        if removed.is_some() {
            stats.closed += 1;
        } else {
            stats.double_closes += 1;
        }
    }

    fn sig_from_token(&self, token: Token) -> Result<&[u8], Status> {
        if let Some(status) = self.faults.lookup {
            return Err(status);
        }
        self.model
            .blobs
            .get(&token)
            .map(Vec::as_slice)
            .ok_or(Status::CLDB_E_RECORD_NOTFOUND)
    }
}

/// [`Dispenser`] that opens [`MemoryImport`] sessions over a fixed model.
///
/// The image bytes are ignored. Every session opened by one dispenser (and
/// its clones) records into the same [`EnumStats`].
#[derive(Clone)]
pub struct MemoryDispenser {
    flavor: Flavor,
    model: Arc<MetadataModel>,
    faults: FaultPlan,
    stats: Arc<Mutex<EnumStats>>,
}

impl MemoryDispenser {
    pub fn new(flavor: Flavor, model: MetadataModel) -> Self {
        Self::with_faults(flavor, model, FaultPlan::default())
    }

    pub fn with_faults(flavor: Flavor, model: MetadataModel, faults: FaultPlan) -> Self {
        Self {
            flavor,
            model: Arc::new(model),
            faults,
            stats: Arc::default(),
        }
    }

    /// Bookkeeping across every session opened so far.
    pub fn stats(&self) -> EnumStats {
        *self.stats.lock()
    }
}

impl Dispenser for MemoryDispenser {
    fn flavor(&self) -> Flavor {
        self.flavor
    }

    fn open_scope<'img>(
        &self,
        _image: &'img [u8],
    ) -> Result<Box<dyn MetadataImport + 'img>, HarnessError> {
        if let Some(status) = self.faults.open {
            return Err(HarnessError::OpenFailure {
                what: format!("{} OpenScopeOnMemory", self.flavor),
                status,
            });
        }
        Ok(Box::new(MemoryImport::shared(
            Arc::clone(&self.model),
            self.faults,
            Arc::clone(&self.stats),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_layout() {
        let model = MetadataModel::synthetic(2, 2, 1, 1);
        assert_eq!(model.types.len(), 2);
        assert_eq!(model.types[0].token.raw(), 0x0200_0002);
        assert_eq!(model.types[1].token.raw(), 0x0200_0003);
        assert_eq!(model.types[1].methods[0].token.raw(), 0x0600_0003);
        assert_eq!(model.types[1].methods[1].params[0].raw(), 0x0800_0004);
        assert_eq!(model.signatures.len(), 2);
        assert_eq!(model.blobs[&model.types[0].methods[0].token], vec![0x20, 1, 0x01, 0x08]);
    }

    #[test]
    fn test_members_are_methods_then_fields() {
        let model = MetadataModel::synthetic(1, 2, 0, 1);
        let members = model.items(EnumQuery::Members(model.types[0].token));
        let tables: Vec<u8> = members.iter().map(|t| t.table()).collect();
        assert_eq!(tables, vec![table::METHOD_DEF, table::METHOD_DEF, table::FIELD_DEF]);
    }

    #[test]
    fn test_unknown_scope_is_empty() {
        let model = MetadataModel::synthetic(1, 1, 1, 1);
        assert!(model.items(EnumQuery::Methods(Token::new(0x0200_0099))).is_empty());
        assert!(model.items(EnumQuery::Params(Token::new(0x0600_0099))).is_empty());
    }

    #[test]
    fn test_close_twice_is_recorded() {
        let import = MemoryImport::new(MetadataModel::synthetic(1, 0, 0, 0));
        let mut handle = RawEnum::UNOPENED;
        let mut buffer = [Token::NIL; 4];
        assert_eq!(import.enum_page(&mut handle, EnumQuery::TypeDefs, &mut buffer), Ok(1));
        import.close_enum(handle);
        import.close_enum(handle);
        let stats = import.stats();
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.double_closes, 1);
        assert_eq!(import.open_handles(), 0);
    }

    #[test]
    fn test_count_on_unknown_handle_fails() {
        let import = MemoryImport::new(MetadataModel::default());
        assert_eq!(
            import.count_enum(RawEnum::from_raw(42)),
            Err(Status::E_INVALIDARG)
        );
        assert_eq!(import.stats().unknown_handle_calls, 1);
    }

    #[test]
    fn test_missing_signature_is_record_not_found() {
        let import = MemoryImport::new(MetadataModel::default());
        assert_eq!(
            import.sig_from_token(Token::new(0x1100_0001)),
            Err(Status::CLDB_E_RECORD_NOTFOUND)
        );
    }

    #[test]
    fn test_dispenser_shares_stats_across_sessions() {
        let dispenser = MemoryDispenser::new(Flavor::Current, MetadataModel::synthetic(2, 0, 0, 0));
        for _ in 0..2 {
            let session = dispenser.open_scope(&[]).unwrap();
            let mut handle = RawEnum::UNOPENED;
            let mut buffer = [Token::NIL; 4];
            session.enum_page(&mut handle, EnumQuery::TypeDefs, &mut buffer).unwrap();
            session.close_enum(handle);
        }
        assert_eq!(dispenser.stats().opened, 2);
        assert_eq!(dispenser.stats().closed, 2);
    }

    #[test]
    fn test_dispenser_open_fault() {
        let faults = FaultPlan {
            open: Some(Status::E_FAIL),
            ..FaultPlan::default()
        };
        let dispenser = MemoryDispenser::with_faults(Flavor::Baseline, MetadataModel::default(), faults);
        let err = dispenser.open_scope(&[]).err().unwrap();
        assert_eq!(err.status(), Some(Status::E_FAIL));
    }
}
