use std::cell::Cell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::ops::Range;

use amx_core::{
    Action, ActionInfo, ActionNode, ActionRegistry, Alert, CompiledMatrix, CompiledTestCase,
    Condition, ConditionFailurePolicy, ConditionalBranch, ControlKind, Dictionary,
    DictionaryProvider, Direction, FieldNode, FieldStructure, GenerationStatus, LoopCount, Matrix,
    MessageNode, MessageRowNode, MessageStructure, NativeType, ProgramNode, Registration, Severity,
    TestCase, UtilityRegistry, ValueExpression, ValueNode,
};
use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::alerts::{AlertCollector, AlertContext};
use crate::builder::{FieldPlan, FieldTarget, FilterValueBuilder};
use crate::match_config::{build_match_tree, MatchOverrides, MatchTreeSource};
use crate::options::CompilerOptions;
use crate::resolver::{
    ExpressionResolver, ProducedValue, ReferenceScope, Resolution, ResolveTarget, RowLookup,
};
use crate::scan::{bracketed_inner, list_items};

/// Read-only collaborators the compiler queries.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub dictionaries: &'a dyn DictionaryProvider,
    pub actions: &'a dyn ActionRegistry,
    pub utilities: &'a dyn UtilityRegistry,
}

#[derive(Debug, Error)]
pub enum CompileFailure {
    #[error("matrix rejected with {} error(s)", count_errors(.alerts))]
    Rejected { alerts: Vec<Alert> },
    #[error("compilation interrupted before line {line}")]
    Interrupted { line: usize },
}

impl CompileFailure {
    pub fn alerts(&self) -> &[Alert] {
        match self {
            Self::Rejected { alerts } => alerts,
            Self::Interrupted { .. } => &[],
        }
    }
}

fn count_errors(alerts: &[Alert]) -> usize {
    alerts
        .iter()
        .filter(|alert| alert.severity == Severity::Error)
        .count()
}

/// Compiles every test case of `matrix`; fails only after the full pass.
pub fn compile_matrix(
    matrix: &Matrix,
    collaborators: Collaborators<'_>,
    options: &CompilerOptions,
) -> Result<CompiledMatrix, CompileFailure> {
    MatrixCompiler::new(matrix, collaborators, options).run()
}

#[derive(Debug)]
struct RowSlot<'a> {
    action: &'a Action,
    status: GenerationStatus,
    /// Left `InProgress` for good because the row sits on a reference cycle.
    aborted: bool,
    generations: u32,
    produced: Option<ProducedValue>,
    overrides: MatchOverrides,
    children: Vec<(String, usize)>,
    owns_reference: bool,
    owns_filter_reference: bool,
}

#[derive(Debug, Clone)]
struct StaticSlot {
    status: GenerationStatus,
    produced: Option<ProducedValue>,
}

/// What a sub-message row takes over from the row that embeds it.
#[derive(Debug, Clone)]
struct Inherited {
    dictionary: Option<String>,
    message_type: Option<String>,
    direction: Direction,
}

#[derive(Debug, Default)]
struct CaseState {
    id: Option<String>,
    block: Option<String>,
    references: HashMap<String, usize>,
    /// Message-only rows that another row embeds; compiled on demand.
    claimed: BTreeSet<usize>,
    /// Sub-message nodes, with their rows, waiting to be emitted ahead of
    /// their parent.
    pending: Vec<(usize, ProgramNode)>,
}

/// Dictionary and message type a row compiles against.
#[derive(Debug, Clone)]
struct RowShape {
    dictionary: Option<String>,
    message_type: Option<String>,
}

struct RowPlan<'a> {
    dictionary_name: Option<String>,
    message_type: Option<String>,
    dictionary: Option<&'a Dictionary>,
    structure: Option<&'a MessageStructure>,
    direction: Direction,
    action_uri: Option<String>,
}

#[derive(Debug)]
enum FrameKind {
    Root,
    Loop {
        line: usize,
        count: LoopCount,
    },
    Conditional {
        line: usize,
        on_failure: ConditionFailurePolicy,
        branches: Vec<ConditionalBranch>,
        /// Branch currently collecting nodes; `None` once `else` was seen.
        current: Option<(usize, Condition)>,
    },
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    nodes: Vec<ProgramNode>,
}

impl Frame {
    fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            nodes: Vec::new(),
        }
    }

    fn opener(&self) -> Option<(ControlKind, usize)> {
        match &self.kind {
            FrameKind::Root => None,
            FrameKind::Loop { line, .. } => Some((ControlKind::BeginLoop, *line)),
            FrameKind::Conditional { line, .. } => Some((ControlKind::BeginIf, *line)),
        }
    }

    fn close(self) -> Option<ProgramNode> {
        match self.kind {
            FrameKind::Root => None,
            FrameKind::Loop { line, count } => Some(ProgramNode::Loop {
                line,
                count,
                body: self.nodes,
            }),
            FrameKind::Conditional {
                line,
                on_failure,
                mut branches,
                current,
            } => {
                let otherwise = match current {
                    Some((branch_line, condition)) => {
                        branches.push(ConditionalBranch {
                            line: branch_line,
                            condition,
                            body: self.nodes,
                        });
                        None
                    }
                    None => Some(self.nodes),
                };
                Some(ProgramNode::Conditional {
                    line,
                    branches,
                    otherwise,
                    on_failure,
                })
            }
        }
    }
}

struct RowScope<'s, 'a> {
    slots: &'s [RowSlot<'a>],
    references: &'s HashMap<String, usize>,
    statics: &'s HashMap<String, StaticSlot>,
    static_owners: &'s HashMap<String, usize>,
    block: Option<&'s str>,
    in_progress_hit: Cell<Option<usize>>,
}

impl ReferenceScope for RowScope<'_, '_> {
    fn lookup_row(&self, reference: &str) -> RowLookup {
        let Some(&row) = self.references.get(reference) else {
            return RowLookup::Unknown;
        };
        let slot = &self.slots[row];
        if slot.aborted {
            return RowLookup::Failed;
        }
        match slot.status {
            GenerationStatus::NotStarted => RowLookup::NotYetDefined,
            GenerationStatus::InProgress => {
                self.in_progress_hit.set(Some(row));
                RowLookup::InProgress
            }
            GenerationStatus::Done => slot
                .produced
                .clone()
                .map(RowLookup::Ready)
                .unwrap_or(RowLookup::Failed),
        }
    }

    fn lookup_static(&self, name: &str) -> RowLookup {
        let Some(slot) = self.statics.get(name) else {
            return RowLookup::Unknown;
        };
        let owner = self.static_owners.get(name).copied();
        if owner.is_some_and(|row| self.slots[row].aborted) {
            return RowLookup::Failed;
        }
        match slot.status {
            GenerationStatus::NotStarted => RowLookup::NotYetDefined,
            GenerationStatus::InProgress => {
                self.in_progress_hit.set(owner);
                RowLookup::InProgress
            }
            GenerationStatus::Done => slot
                .produced
                .clone()
                .map(RowLookup::Ready)
                .unwrap_or(RowLookup::Failed),
        }
    }

    fn block_reference(&self) -> Option<&str> {
        self.block
    }
}

struct ArenaTree<'s, 'a>(&'s [RowSlot<'a>]);

impl MatchTreeSource for ArenaTree<'_, '_> {
    fn overrides(&self, node: usize) -> Option<&MatchOverrides> {
        self.0.get(node).map(|slot| &slot.overrides)
    }

    fn children(&self, node: usize) -> Vec<(String, usize)> {
        self.0
            .get(node)
            .map(|slot| slot.children.clone())
            .unwrap_or_default()
    }
}

struct MatrixCompiler<'a> {
    matrix: &'a Matrix,
    dictionaries: &'a dyn DictionaryProvider,
    actions: &'a dyn ActionRegistry,
    options: &'a CompilerOptions,
    resolver: ExpressionResolver<'a>,
    builder: FilterValueBuilder,
    alerts: AlertCollector,
    slots: Vec<RowSlot<'a>>,
    ranges: Vec<Range<usize>>,
    statics: HashMap<String, StaticSlot>,
    static_owners: HashMap<String, usize>,
    static_order: Vec<String>,
    /// Rows found `InProgress` by a reference and not yet unwound.
    open_cycles: Vec<usize>,
    case: CaseState,
}

impl<'a> MatrixCompiler<'a> {
    fn new(matrix: &'a Matrix, collaborators: Collaborators<'a>, options: &'a CompilerOptions) -> Self {
        let mut slots = Vec::new();
        let mut ranges = Vec::with_capacity(matrix.test_cases.len());
        for test_case in &matrix.test_cases {
            let start = slots.len();
            slots.extend(test_case.actions.iter().map(|action| RowSlot {
                action,
                status: GenerationStatus::NotStarted,
                aborted: false,
                generations: 0,
                produced: None,
                overrides: MatchOverrides::default(),
                children: Vec::new(),
                owns_reference: false,
                owns_filter_reference: false,
            }));
            ranges.push(start..slots.len());
        }

        Self {
            matrix,
            dictionaries: collaborators.dictionaries,
            actions: collaborators.actions,
            options,
            resolver: ExpressionResolver::new(collaborators.dictionaries, collaborators.utilities),
            builder: FilterValueBuilder::new(options.check_expressions),
            alerts: AlertCollector::new(options.deduplicate_alerts),
            slots,
            ranges,
            statics: HashMap::new(),
            static_owners: HashMap::new(),
            static_order: Vec::new(),
            open_cycles: Vec::new(),
            case: CaseState::default(),
        }
    }

    fn run(mut self) -> Result<CompiledMatrix, CompileFailure> {
        self.declare_statics();

        let matrix = self.matrix;
        let mut test_cases = Vec::with_capacity(matrix.test_cases.len());
        for (index, test_case) in matrix.test_cases.iter().enumerate() {
            let range = self.ranges[index].clone();
            let nodes = self.compile_test_case(test_case, range)?;
            test_cases.push(CompiledTestCase {
                id: test_case.id.clone(),
                description: test_case.description.clone(),
                kind: test_case.kind,
                matrix_order: test_case.matrix_order,
                execution_order: test_case.execution_order,
                add_to_report: test_case.add_to_report,
                block_reference: test_case.block_reference.clone(),
                nodes,
            });
        }

        info!(
            matrix = %matrix.name,
            test_cases = test_cases.len(),
            rows = self.slots.len(),
            errors = self.alerts.error_count(),
            warnings = self.alerts.warning_count(),
            "matrix compiled"
        );

        if self.alerts.has_errors() {
            return Err(CompileFailure::Rejected {
                alerts: self.alerts.into_vec(),
            });
        }
        Ok(CompiledMatrix {
            name: matrix.name.clone(),
            test_cases,
            statics: self.static_order,
            alerts: self.alerts.into_vec(),
        })
    }

    /// Statics are matrix scoped: every name is known up front so a use
    /// before its definition reads as "not yet defined".
    fn declare_statics(&mut self) {
        let actions = self.actions;
        for row in 0..self.slots.len() {
            let action = self.slots[row].action;
            let declares = match action.control_kind() {
                Some(ControlKind::DefineStatic) => true,
                Some(_) => false,
                None => action
                    .operation()
                    .and_then(|operation| actions.resolve_action(operation))
                    .is_some_and(|info| info.produces_static),
            };
            let Some(name) = action.reference_name().filter(|_| declares) else {
                continue;
            };
            if self.static_owners.contains_key(name) {
                let context = self.row_context(action);
                self.alerts.error(
                    &context,
                    format!("Duplicate static \"{}\"; this row is compiled but not registered.", name),
                );
                continue;
            }
            self.static_owners.insert(name.to_string(), row);
            self.statics.insert(
                name.to_string(),
                StaticSlot {
                    status: GenerationStatus::NotStarted,
                    produced: None,
                },
            );
        }
    }

    fn compile_test_case(
        &mut self,
        test_case: &'a TestCase,
        range: Range<usize>,
    ) -> Result<Vec<ProgramNode>, CompileFailure> {
        self.prepare_case(test_case, range.clone());
        debug!(test_case = ?test_case.id, rows = range.len(), "compiling test case");

        let mut frames = vec![Frame::new(FrameKind::Root)];
        for row in range {
            let action = self.slots[row].action;
            if self.options.is_cancelled() {
                info!(line = action.line, "compilation interrupted");
                return Err(CompileFailure::Interrupted { line: action.line });
            }
            if let Some(kind) = action.control_kind() {
                self.control_row(kind, row, &mut frames);
                continue;
            }
            if self.slots[row].status != GenerationStatus::NotStarted || self.case.claimed.contains(&row) {
                continue;
            }
            let node = self.generate_row(row, None);
            self.emit(row, node, &mut frames);
        }

        while frames.len() > 1 {
            let Some(frame) = frames.pop() else {
                break;
            };
            if let Some((kind, line)) = frame.opener() {
                let context = AlertContext {
                    line,
                    test_case: self.case.id.clone(),
                    ..AlertContext::default()
                };
                self.alerts.error(
                    &context,
                    format!("Unclosed \"{}\" scope; closed at the end of the test case.", kind.keyword()),
                );
            }
            if let Some(node) = frame.close() {
                push_node(&mut frames, node);
            }
        }

        // Embedded rows whose parent never asked for them still compile, at
        // the top level of the test case.
        let leftovers = self.case.claimed.iter().copied().collect::<Vec<_>>();
        for row in leftovers {
            if self.slots[row].status == GenerationStatus::NotStarted {
                let node = self.generate_row(row, None);
                self.emit(row, node, &mut frames);
            }
        }

        Ok(frames.pop().map(|root| root.nodes).unwrap_or_default())
    }

    fn prepare_case(&mut self, test_case: &TestCase, range: Range<usize>) {
        self.case = CaseState {
            id: test_case.id.clone(),
            block: test_case
                .block_reference
                .as_deref()
                .map(str::trim)
                .filter(|block| !block.is_empty())
                .map(str::to_string),
            ..CaseState::default()
        };

        for row in range.clone() {
            let action = self.slots[row].action;
            if action.control_kind().is_some() {
                continue;
            }
            let names = [
                (action.reference_name(), false),
                (action.reference_to_filter_name(), true),
            ];
            for (name, is_filter) in names {
                let Some(name) = name else {
                    continue;
                };
                if self.case.references.contains_key(name) {
                    let context = self.row_context(action);
                    self.alerts.error(
                        &context,
                        format!(
                            "Duplicate reference \"{}\" in test case; this row is compiled but not registered.",
                            name
                        ),
                    );
                    continue;
                }
                self.case.references.insert(name.to_string(), row);
                if is_filter {
                    self.slots[row].owns_filter_reference = true;
                } else {
                    self.slots[row].owns_reference = true;
                }
            }
        }

        self.claim_sub_messages(range);
    }

    /// Claims the message-only rows named in a complex field of another row.
    /// A claimed row learns its dictionary and type from the claiming field,
    /// so it is queued again to claim rows of its own.
    fn claim_sub_messages(&mut self, range: Range<usize>) {
        let dictionaries = self.dictionaries;
        let mut shapes: HashMap<usize, RowShape> = HashMap::new();
        let mut queue = range.collect::<VecDeque<_>>();

        while let Some(row) = queue.pop_front() {
            let action = self.slots[row].action;
            if action.control_kind().is_some() {
                continue;
            }
            let shape = shapes
                .get(&row)
                .cloned()
                .unwrap_or_else(|| self.own_shape(action));
            let structure = shape
                .dictionary
                .as_deref()
                .and_then(|name| dictionaries.dictionary(name))
                .zip(shape.message_type.as_deref())
                .and_then(|(dictionary, message_type)| dictionary.message(message_type));
            let Some(structure) = structure else {
                continue;
            };

            for (name, text) in &action.fields {
                let Some(field) = structure.field(name).filter(|field| field.is_complex()) else {
                    continue;
                };
                let Some(items) = bracketed_inner(text).and_then(list_items) else {
                    continue;
                };
                for item in items {
                    let Some(&target) = self.case.references.get(item) else {
                        continue;
                    };
                    let embedded = self.slots[target].action;
                    if target == row || !embedded.is_message_only() || !self.case.claimed.insert(target) {
                        continue;
                    }
                    let own = self.own_shape(embedded);
                    shapes.insert(
                        target,
                        RowShape {
                            dictionary: own.dictionary.or_else(|| shape.dictionary.clone()),
                            message_type: own
                                .message_type
                                .or_else(|| field.complex_message().map(str::to_string)),
                        },
                    );
                    queue.push_back(target);
                }
            }
        }
    }

    fn own_shape(&self, action: &Action) -> RowShape {
        RowShape {
            dictionary: non_empty(action.dictionary.as_deref()).map(str::to_string),
            message_type: non_empty(action.message_type.as_deref())
                .map(str::to_string)
                .or_else(|| {
                    action
                        .operation()
                        .and_then(|operation| self.actions.resolve_action(operation))
                        .and_then(|info| info.message_type.clone())
                }),
        }
    }

    fn row_context(&self, action: &Action) -> AlertContext {
        AlertContext {
            line: action.line,
            test_case: self.case.id.clone(),
            row_id: action.id.clone(),
            reference: action.reference_name().map(str::to_string),
            column: None,
        }
    }

    fn emit(&mut self, row: usize, node: Option<ProgramNode>, frames: &mut [Frame]) {
        for (pending_row, pending) in std::mem::take(&mut self.case.pending) {
            self.push_guarded(pending_row, pending, frames);
        }
        if let Some(node) = node {
            self.push_guarded(row, node, frames);
        }
    }

    /// Wraps `node` in a guard when its row declares dependencies.
    fn push_guarded(&mut self, row: usize, node: ProgramNode, frames: &mut [Frame]) {
        let action = self.slots[row].action;
        let dependencies = action.dependency_names();
        if dependencies.is_empty() {
            push_node(frames, node);
            return;
        }

        let context = self.row_context(action).with_column("dependencies");
        let mut requires = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            if self.case.references.contains_key(&dependency) {
                requires.push(dependency);
            } else {
                self.alerts.error(
                    &context,
                    format!("Unknown dependency \"{}\".", dependency),
                );
            }
        }
        if requires.is_empty() {
            push_node(frames, node);
            return;
        }
        push_node(
            frames,
            ProgramNode::Guard {
                line: action.line,
                requires,
                body: Box::new(node),
            },
        );
    }

    fn resolve_cell(
        &mut self,
        expression: &mut ValueExpression,
        target: ResolveTarget<'_>,
        context: &AlertContext,
    ) -> Resolution {
        let scope = RowScope {
            slots: &self.slots,
            references: &self.case.references,
            statics: &self.statics,
            static_owners: &self.static_owners,
            block: self.case.block.as_deref(),
            in_progress_hit: Cell::new(None),
        };
        let outcome = self
            .resolver
            .resolve(expression, &target, &scope, context, &mut self.alerts);
        if outcome == Resolution::Recursion {
            if let Some(row) = scope.in_progress_hit.get() {
                self.open_cycles.push(row);
            }
        }
        outcome
    }

    /// Drives one row through `NotStarted -> InProgress -> Done`. A row whose
    /// fields hit a reference cycle never reaches `Done`.
    fn generate_row(&mut self, row: usize, inherited: Option<&Inherited>) -> Option<ProgramNode> {
        let action = self.slots[row].action;
        self.slots[row].status = GenerationStatus::InProgress;
        self.slots[row].generations += 1;
        trace!(line = action.line, reference = ?action.reference_name(), "row in progress");

        let context = self.row_context(action);
        let operation = action.operation();
        let actions = self.actions;
        let info = match operation {
            Some(operation) => {
                let info = actions.resolve_action(operation);
                if info.is_none() {
                    self.alerts.error(
                        &context.with_column("action"),
                        format!("Unknown action \"{}\".", operation),
                    );
                }
                info
            }
            None => None,
        };

        let plan = self.plan_row(action, info, inherited, &context);
        if let Some(name) = action
            .reference_name()
            .filter(|name| self.static_owners.get(*name) == Some(&row))
        {
            if let Some(slot) = self.statics.get_mut(name) {
                slot.status = GenerationStatus::InProgress;
            }
        }

        let service_name = match (operation, non_empty(action.service_name.as_deref())) {
            (Some(_), Some(text)) => {
                let service_context = context.with_column("service_name");
                let mut expression = ValueExpression::new(text, action.location());
                match self.resolve_cell(&mut expression, plan.resolve_target(), &service_context) {
                    Resolution::Resolved => self.builder.standalone_value(
                        &expression,
                        NativeType::String,
                        &service_context,
                        &mut self.alerts,
                    ),
                    _ => None,
                }
            }
            _ => None,
        };

        let (fields, recursion) = self.compile_fields(row, &plan, &context);
        self.slots[row].overrides =
            MatchOverrides::from_action(action, plan.structure, &context, &mut self.alerts);

        if recursion {
            self.slots[row].aborted = true;
            self.open_cycles.retain(|&open| open != row);
            debug!(line = action.line, "row aborted on a reference cycle");
            return None;
        }

        let produced = match info
            .and_then(|info| info.return_type.as_deref())
            .and_then(NativeType::parse)
        {
            Some(native) => ProducedValue::Native(native),
            None => ProducedValue::Message {
                dictionary: plan.dictionary_name.clone(),
                message_type: plan.message_type.clone(),
            },
        };
        let registrations = self.registrations(row, info, &produced);
        self.slots[row].produced = Some(produced);
        self.slots[row].status = GenerationStatus::Done;
        trace!(line = action.line, "row done");

        let has_message = plan.message_type.is_some() || !fields.is_empty();
        let message = MessageNode {
            dictionary: plan.dictionary_name.clone(),
            message_type: plan.message_type.clone(),
            direction: plan.direction,
            fields,
        };

        let node = match operation {
            Some(operation) => {
                let match_config = (plan.direction.is_receive() && inherited.is_none()).then(|| {
                    build_match_tree(
                        &ArenaTree(&self.slots),
                        row,
                        self.options.default_fail_unexpected,
                    )
                });
                ProgramNode::Action(ActionNode {
                    line: action.line,
                    row_id: action.id.clone(),
                    operation: operation.to_string(),
                    display_name: actions
                        .display_name(operation)
                        .unwrap_or(operation)
                        .to_string(),
                    direction: plan.direction,
                    service_name,
                    message: has_message.then_some(message),
                    match_config,
                    registrations,
                })
            }
            None => ProgramNode::Message(MessageRowNode {
                line: action.line,
                row_id: action.id.clone(),
                message,
                registrations,
            }),
        };
        debug!(line = action.line, reference = ?action.reference_name(), "row compiled");
        Some(node)
    }

    fn plan_row(
        &mut self,
        action: &Action,
        info: Option<&ActionInfo>,
        inherited: Option<&Inherited>,
        context: &AlertContext,
    ) -> RowPlan<'a> {
        let direction = match (action.operation(), info, inherited) {
            (Some(_), Some(info), _) => info.direction,
            (Some(_), None, _) => Direction::None,
            (None, _, Some(inherited)) => inherited.direction,
            (None, _, None) => Direction::Send,
        };
        let dictionary_name = non_empty(action.dictionary.as_deref())
            .map(str::to_string)
            .or_else(|| inherited.and_then(|inherited| inherited.dictionary.clone()));

        let own_type = non_empty(action.message_type.as_deref())
            .map(str::to_string)
            .or_else(|| info.and_then(|info| info.message_type.clone()));
        let expected_type = inherited.and_then(|inherited| inherited.message_type.clone());
        if let (Some(own), Some(expected)) = (&own_type, &expected_type) {
            if own != expected {
                self.alerts.error(
                    &context.with_column("message_type"),
                    format!(
                        "Sub-message is declared as \"{}\" but the embedding field expects \"{}\".",
                        own, expected
                    ),
                );
            }
        }
        let message_type = own_type.or(expected_type);

        let dictionaries = self.dictionaries;
        let dictionary = match dictionary_name.as_deref() {
            Some(name) => {
                let found = dictionaries.dictionary(name);
                if found.is_none() {
                    self.alerts.error(
                        &context.with_column("dictionary"),
                        format!("Dictionary \"{}\" not found.", name),
                    );
                }
                found
            }
            None => None,
        };
        let structure = match (dictionary, message_type.as_deref()) {
            (Some(dictionary), Some(message_type)) => {
                let found = dictionary.message(message_type);
                if found.is_none() {
                    self.alerts.error(
                        &context.with_column("message_type"),
                        format!(
                            "Message \"{}\" is not defined in dictionary \"{}\".",
                            message_type, dictionary.name
                        ),
                    );
                }
                found
            }
            _ => None,
        };

        RowPlan {
            dictionary_name,
            message_type,
            dictionary,
            structure,
            direction,
            action_uri: action.operation().map(str::to_string),
        }
    }

    /// Complex fields first so embedded rows are generated before any
    /// simple field of this row is resolved.
    fn compile_fields(
        &mut self,
        row: usize,
        plan: &RowPlan<'a>,
        context: &AlertContext,
    ) -> (IndexMap<String, FieldNode>, bool) {
        let action = self.slots[row].action;
        let mut built: HashMap<&str, FieldNode> = HashMap::new();
        let mut recursion = false;

        let mut ordered = Vec::with_capacity(action.fields.len());
        for (name, text) in &action.fields {
            if text.trim().is_empty() {
                continue;
            }
            let structure = match plan.structure {
                Some(message) => match message.field(name) {
                    Some(field) => Some(field),
                    None => {
                        self.alerts.error(
                            &context.with_column(name.as_str()),
                            format!(
                                "Field \"{}\" is not defined in message \"{}\".",
                                name, message.name
                            ),
                        );
                        continue;
                    }
                },
                None => None,
            };
            ordered.push((name.as_str(), text.as_str(), structure));
        }
        ordered.sort_by_key(|(_, _, structure)| !structure.is_some_and(FieldStructure::is_complex));

        for (name, text, structure) in ordered {
            let field_context = context.with_column(name);
            let target = FieldTarget {
                name,
                structure,
                enumeration: match (plan.dictionary, structure) {
                    (Some(dictionary), Some(field)) => dictionary.enum_for(field),
                    _ => None,
                },
                direction: plan.direction,
            };
            let mut expression = ValueExpression::new(text, action.location());

            if let Some(field) = structure.filter(|field| field.is_complex()) {
                match self.builder.build(&expression, &target, context, &mut self.alerts) {
                    FieldPlan::Ready(node) => {
                        built.insert(name, node);
                    }
                    FieldPlan::SubMessages(references) => {
                        match self.compile_sub_messages(row, field, &references, plan, &field_context) {
                            Ok(node) => {
                                built.insert(name, node);
                            }
                            Err(Resolution::Recursion) => recursion = true,
                            Err(_) => {}
                        }
                    }
                    FieldPlan::Failed => {}
                }
                continue;
            }

            match self.resolve_cell(&mut expression, plan.resolve_target(), &field_context) {
                Resolution::Resolved => {}
                Resolution::Recursion => {
                    recursion = true;
                    continue;
                }
                Resolution::Failed => continue,
            }
            if let FieldPlan::Ready(node) =
                self.builder.build(&expression, &target, context, &mut self.alerts)
            {
                built.insert(name, node);
            }
        }

        let mut fields = IndexMap::with_capacity(built.len());
        for name in action.fields.keys() {
            if let Some(node) = built.remove(name.as_str()) {
                fields.insert(name.clone(), node);
            }
        }
        (fields, recursion)
    }

    fn compile_sub_messages(
        &mut self,
        parent: usize,
        field: &FieldStructure,
        references: &[String],
        plan: &RowPlan<'a>,
        context: &AlertContext,
    ) -> Result<FieldNode, Resolution> {
        let expected = field.complex_message();
        let mut children = Vec::with_capacity(references.len());
        let mut outcome = Resolution::Resolved;

        for (position, reference) in references.iter().enumerate() {
            let Some(&child) = self.case.references.get(reference) else {
                self.alerts.error(
                    context,
                    format!("Sub-message reference \"{}\" is not defined in this test case.", reference),
                );
                outcome = outcome.max(Resolution::Failed);
                continue;
            };
            match self.require_sub_message(child, reference, expected, plan, context) {
                Ok(message_type) => {
                    let path = if field.is_collection {
                        format!("{}[{}]", field.name, position)
                    } else {
                        field.name.clone()
                    };
                    self.slots[parent].children.push((path, child));
                    children.push((reference.clone(), message_type));
                }
                Err(step) => outcome = outcome.max(step),
            }
        }

        if outcome != Resolution::Resolved {
            return Err(outcome);
        }
        Ok(FilterValueBuilder::message_field(
            children,
            field.is_collection,
            plan.direction,
        ))
    }

    fn require_sub_message(
        &mut self,
        child: usize,
        reference: &str,
        expected: Option<&str>,
        plan: &RowPlan<'a>,
        context: &AlertContext,
    ) -> Result<Option<String>, Resolution> {
        if self.slots[child].aborted {
            self.alerts.error(
                context,
                format!("Sub-message \"{}\" could not be generated.", reference),
            );
            return Err(Resolution::Failed);
        }

        match self.slots[child].status {
            GenerationStatus::InProgress => {
                self.alerts.error(
                    context,
                    format!(
                        "Recursion detected: sub-message \"{}\" is still being generated.",
                        reference
                    ),
                );
                self.open_cycles.push(child);
                Err(Resolution::Recursion)
            }
            GenerationStatus::Done => {
                let produced = match &self.slots[child].produced {
                    Some(ProducedValue::Message { message_type, .. }) => message_type.clone(),
                    _ => None,
                };
                if let (Some(produced), Some(expected)) = (produced.as_deref(), expected) {
                    if produced != expected {
                        self.alerts.error(
                            context,
                            format!(
                                "Sub-message \"{}\" has type \"{}\" but the field expects \"{}\".",
                                reference, produced, expected
                            ),
                        );
                        return Err(Resolution::Failed);
                    }
                }
                Ok(produced.or_else(|| expected.map(str::to_string)))
            }
            GenerationStatus::NotStarted => {
                if !self.slots[child].action.is_message_only() {
                    self.alerts.error(
                        context,
                        format!(
                            "Sub-message reference \"{}\" points to an action that is not yet defined.",
                            reference
                        ),
                    );
                    return Err(Resolution::Failed);
                }

                debug!(reference, line = context.line, "generating nested dependency");
                let inherited = Inherited {
                    dictionary: plan.dictionary_name.clone(),
                    message_type: expected.map(str::to_string),
                    direction: plan.direction,
                };
                let node = self.generate_row(child, Some(&inherited));
                if self.slots[child].aborted {
                    if self.open_cycles.is_empty() {
                        self.alerts.error(
                            context,
                            format!(
                                "Sub-message \"{}\" could not be generated because of a reference cycle.",
                                reference
                            ),
                        );
                        return Err(Resolution::Failed);
                    }
                    self.alerts.error(
                        context,
                        format!(
                            "Recursion detected while generating sub-message \"{}\".",
                            reference
                        ),
                    );
                    return Err(Resolution::Recursion);
                }
                if let Some(node) = node {
                    self.case.pending.push((child, node));
                }
                Ok(match &self.slots[child].produced {
                    Some(ProducedValue::Message { message_type, .. }) => message_type.clone(),
                    _ => None,
                })
            }
        }
    }

    fn registrations(
        &mut self,
        row: usize,
        info: Option<&ActionInfo>,
        produced: &ProducedValue,
    ) -> Vec<Registration> {
        let slot = &self.slots[row];
        let action = slot.action;
        let mut registrations = Vec::new();

        if let Some(name) = action.reference_name().filter(|_| slot.owns_reference) {
            registrations.push(Registration::TestCase {
                name: name.to_string(),
            });
            if let Some(block) = &self.case.block {
                registrations.push(Registration::Block {
                    block: block.clone(),
                    name: name.to_string(),
                });
            }
        }
        if let Some(name) = action
            .reference_to_filter_name()
            .filter(|_| slot.owns_filter_reference)
        {
            registrations.push(Registration::TestCase {
                name: name.to_string(),
            });
        }

        let publishes_static = info.is_some_and(|info| info.produces_static);
        if let Some(name) = action.reference_name().filter(|_| publishes_static) {
            if self.static_owners.get(name) == Some(&row) {
                self.publish_static(name, produced.clone());
                registrations.push(Registration::Static {
                    name: name.to_string(),
                });
            }
        }
        registrations
    }

    fn publish_static(&mut self, name: &str, produced: ProducedValue) {
        self.statics.insert(
            name.to_string(),
            StaticSlot {
                status: GenerationStatus::Done,
                produced: Some(produced),
            },
        );
        self.static_order.push(name.to_string());
    }

    fn control_row(&mut self, kind: ControlKind, row: usize, frames: &mut Vec<Frame>) {
        let action = self.slots[row].action;
        self.slots[row].status = GenerationStatus::InProgress;
        self.slots[row].generations += 1;
        let context = self.row_context(action);
        trace!(line = action.line, keyword = kind.keyword(), "control row");

        match kind {
            ControlKind::BeginLoop => {
                let count = self.loop_count(action, &context);
                frames.push(Frame::new(FrameKind::Loop {
                    line: action.line,
                    count,
                }));
            }
            ControlKind::EndLoop => {
                if matches!(frames.last().map(|frame| &frame.kind), Some(FrameKind::Loop { .. })) {
                    if let Some(node) = frames.pop().and_then(Frame::close) {
                        push_node(frames, node);
                    }
                } else {
                    self.unmatched(kind, ControlKind::BeginLoop, &context);
                }
            }
            ControlKind::BeginIf => {
                let condition = self.condition(action, &context);
                let continues = action
                    .continue_on_failure
                    .unwrap_or(self.options.continue_on_failure);
                frames.push(Frame::new(FrameKind::Conditional {
                    line: action.line,
                    on_failure: if continues {
                        ConditionFailurePolicy::LogAndContinue
                    } else {
                        ConditionFailurePolicy::AbortTestCase
                    },
                    branches: Vec::new(),
                    current: Some((action.line, condition)),
                }));
            }
            ControlKind::ElseIf | ControlKind::Else => {
                let condition = (kind == ControlKind::ElseIf).then(|| self.condition(action, &context));
                let Some(frame) = frames.last_mut().filter(|frame| {
                    matches!(frame.kind, FrameKind::Conditional { current: Some(_), .. })
                }) else {
                    self.unmatched(kind, ControlKind::BeginIf, &context);
                    self.slots[row].status = GenerationStatus::Done;
                    return;
                };
                if let FrameKind::Conditional {
                    branches, current, ..
                } = &mut frame.kind
                {
                    if let Some((line, finished)) = current.take() {
                        branches.push(ConditionalBranch {
                            line,
                            condition: finished,
                            body: std::mem::take(&mut frame.nodes),
                        });
                    }
                    *current = condition.map(|condition| (action.line, condition));
                }
            }
            ControlKind::EndIf => {
                if matches!(
                    frames.last().map(|frame| &frame.kind),
                    Some(FrameKind::Conditional { .. })
                ) {
                    if let Some(node) = frames.pop().and_then(Frame::close) {
                        push_node(frames, node);
                    }
                } else {
                    self.unmatched(kind, ControlKind::BeginIf, &context);
                }
            }
            ControlKind::DefineStatic => {
                let node = self.define_static(row, &context);
                self.emit(row, node, frames);
            }
        }
        self.slots[row].status = GenerationStatus::Done;
    }

    fn unmatched(&mut self, kind: ControlKind, opener: ControlKind, context: &AlertContext) {
        self.alerts.error(
            &context.with_column("action"),
            format!(
                "\"{}\" without a matching \"{}\".",
                kind.keyword(),
                opener.keyword()
            ),
        );
    }

    fn loop_count(&mut self, action: &Action, context: &AlertContext) -> LoopCount {
        let context = context.with_column("count");
        let Some(text) = non_empty(action.count.as_deref()) else {
            self.alerts.error(&context, "\"begin loop\" row requires a count.");
            return LoopCount::Fixed { count: 0 };
        };
        if let Ok(count) = text.parse::<u64>() {
            return LoopCount::Fixed { count };
        }
        if text.parse::<i64>().is_ok() {
            self.alerts.error(
                &context,
                format!("Loop count \"{}\" must not be negative.", text),
            );
            return LoopCount::Fixed { count: 0 };
        }

        let mut expression = ValueExpression::new(text, action.location());
        if self.resolve_cell(&mut expression, ResolveTarget::default(), &context) != Resolution::Resolved {
            return LoopCount::Fixed { count: 0 };
        }
        match self.builder.standalone_expression(
            &expression,
            Some(NativeType::Long),
            &context,
            &mut self.alerts,
        ) {
            Some(expr) => LoopCount::Expression { expr },
            None => LoopCount::Fixed { count: 0 },
        }
    }

    fn condition(&mut self, action: &Action, context: &AlertContext) -> Condition {
        let context = context.with_column("condition");
        let Some(text) = non_empty(action.condition.as_deref()) else {
            self.alerts.error(&context, "Conditional row requires a condition.");
            return Condition::Constant { value: false };
        };
        match text.to_ascii_lowercase().as_str() {
            "true" => return Condition::Constant { value: true },
            "false" => return Condition::Constant { value: false },
            _ => {}
        }

        let mut expression = ValueExpression::new(text, action.location());
        if self.resolve_cell(&mut expression, ResolveTarget::default(), &context) != Resolution::Resolved {
            return Condition::Constant { value: false };
        }
        match self.builder.standalone_expression(
            &expression,
            Some(NativeType::Boolean),
            &context,
            &mut self.alerts,
        ) {
            Some(expr) => Condition::Expression { expr },
            None => Condition::Constant { value: false },
        }
    }

    /// The static is published even when its value fails to build so later
    /// uses report nothing beyond the original error.
    fn define_static(&mut self, row: usize, context: &AlertContext) -> Option<ProgramNode> {
        let action = self.slots[row].action;
        let Some(name) = action.reference_name() else {
            self.alerts.error(
                &context.with_column("reference"),
                "\"define static\" row requires a reference.",
            );
            return None;
        };
        let owner = self.static_owners.get(name) == Some(&row);

        let native = match non_empty(action.static_type.as_deref()) {
            None => NativeType::String,
            Some(raw) => match NativeType::parse(raw) {
                Some(native) => native,
                None => {
                    self.alerts.error(
                        &context.with_column("static_type"),
                        format!("Unknown static type \"{}\".", raw),
                    );
                    NativeType::String
                }
            },
        };

        if owner {
            if let Some(slot) = self.statics.get_mut(name) {
                slot.status = GenerationStatus::InProgress;
            }
        }

        let value_context = context.with_column("static_value");
        let value = match non_empty(action.static_value.as_deref()) {
            None => {
                self.alerts.error(
                    &value_context,
                    format!("Static \"{}\" requires a value.", name),
                );
                None
            }
            Some(text) => {
                let mut expression = ValueExpression::new(text, action.location());
                let outcome =
                    self.resolve_cell(&mut expression, ResolveTarget::default(), &value_context);
                self.open_cycles.retain(|&open| open != row);
                match outcome {
                    Resolution::Resolved => self.builder.standalone_value(
                        &expression,
                        native,
                        &value_context,
                        &mut self.alerts,
                    ),
                    _ => None,
                }
            }
        };

        if owner {
            self.publish_static(name, ProducedValue::Native(native));
        }
        debug!(line = action.line, name, "static defined");
        value.map(|value: ValueNode| ProgramNode::StaticAssign {
            line: action.line,
            name: name.to_string(),
            value,
        })
    }
}

impl RowPlan<'_> {
    fn resolve_target(&self) -> ResolveTarget<'_> {
        ResolveTarget {
            dictionary: self.dictionary_name.as_deref(),
            action: self.action_uri.as_deref(),
        }
    }
}

fn push_node(frames: &mut [Frame], node: ProgramNode) {
    if let Some(frame) = frames.last_mut() {
        frame.nodes.push(node);
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
