use arrow_schema::{DataType, Field, Fields, TimeUnit};
use flint_common::{ExprId, FlintError, Result};
use serde::{Deserialize, Serialize};

use crate::logical_plan::LogicalPlan;

/// Scalar constant values carried by [`Expr::Literal`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Boolean(bool),
    Null,
}

impl LiteralValue {
    /// Render the value the way it appears in generated column names.
    pub fn render(&self) -> String {
        match self {
            LiteralValue::Int64(v) => v.to_string(),
            LiteralValue::Float64(v) => v.to_string(),
            LiteralValue::Utf8(v) => v.clone(),
            LiteralValue::Boolean(v) => v.to_string(),
            LiteralValue::Null => "NULL".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
    ShiftRight,
    BitAnd,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }
}

/// A concrete reference to a produced column.
///
/// Two references with the same [`ExprId`] denote the same column regardless
/// of name or qualifier spelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub id: ExprId,
    pub qualifier: Option<String>,
}

impl AttributeRef {
    /// Create an attribute with a freshly minted id.
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            id: ExprId::fresh(),
            qualifier: None,
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Same column shape, fresh id. Used when a relation instance must be
    /// distinguishable from another occurrence of itself.
    pub fn new_instance(&self) -> Self {
        Self {
            id: ExprId::fresh(),
            ..self.clone()
        }
    }

    /// `qualifier.name` or bare `name`.
    pub fn qualified_name(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{q}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Sort direction for [`SortOrder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One sort key: an expression plus direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortOrder {
    pub expr: Expr,
    pub direction: SortDirection,
}

impl SortOrder {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            direction: SortDirection::Descending,
        }
    }

    pub fn with_expr(&self, expr: Expr) -> Self {
        Self {
            expr,
            direction: self.direction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowFrameUnits {
    Rows,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowFrameBound {
    UnboundedPreceding,
    Preceding(u64),
    CurrentRow,
    Following(u64),
    UnboundedFollowing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowFrameSpec {
    pub units: WindowFrameUnits,
    pub start: WindowFrameBound,
    pub end: WindowFrameBound,
}

impl WindowFrameSpec {
    pub fn new(units: WindowFrameUnits, start: WindowFrameBound, end: WindowFrameBound) -> Self {
        Self { units, start, end }
    }

    /// Default frame when none was written: range-based up to the current row
    /// when an ordering exists, otherwise the whole partition.
    pub fn default_frame(ordered: bool) -> Self {
        if ordered {
            Self::new(
                WindowFrameUnits::Range,
                WindowFrameBound::UnboundedPreceding,
                WindowFrameBound::CurrentRow,
            )
        } else {
            Self::new(
                WindowFrameUnits::Rows,
                WindowFrameBound::UnboundedPreceding,
                WindowFrameBound::UnboundedFollowing,
            )
        }
    }
}

/// The `(partition, order, frame)` neighborhood definition of a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WindowSpec {
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<SortOrder>,
    pub frame: Option<WindowFrameSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateKind {
    Sum,
    Min,
    Max,
    Count,
    Avg,
    First,
    Last,
}

impl AggregateKind {
    pub fn display_name(self) -> &'static str {
        match self {
            AggregateKind::Sum => "sum",
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
            AggregateKind::Count => "count",
            AggregateKind::Avg => "avg",
            AggregateKind::First => "first",
            AggregateKind::Last => "last",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateMode {
    Partial,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowFunctionKind {
    RowNumber,
    Rank,
    DenseRank,
    NTile,
    Lead,
    Lag,
}

impl WindowFunctionKind {
    pub fn display_name(self) -> &'static str {
        match self {
            WindowFunctionKind::RowNumber => "row_number",
            WindowFunctionKind::Rank => "rank",
            WindowFunctionKind::DenseRank => "dense_rank",
            WindowFunctionKind::NTile => "ntile",
            WindowFunctionKind::Lead => "lead",
            WindowFunctionKind::Lag => "lag",
        }
    }

    /// Rank-like functions need an ORDER BY and have the order keys injected
    /// as their operands.
    pub fn rank_like(self) -> bool {
        matches!(self, WindowFunctionKind::Rank | WindowFunctionKind::DenseRank)
    }

    pub fn requires_order(self) -> bool {
        matches!(
            self,
            WindowFunctionKind::Rank
                | WindowFunctionKind::DenseRank
                | WindowFunctionKind::NTile
                | WindowFunctionKind::Lead
                | WindowFunctionKind::Lag
        )
    }

    /// Frame the function mandates, if it has an opinion.
    pub fn required_frame(self, args: &[Expr]) -> Option<WindowFrameSpec> {
        use WindowFrameBound::*;
        use WindowFrameUnits::*;
        match self {
            WindowFunctionKind::RowNumber | WindowFunctionKind::NTile => {
                Some(WindowFrameSpec::new(Rows, UnboundedPreceding, CurrentRow))
            }
            WindowFunctionKind::Rank | WindowFunctionKind::DenseRank => {
                Some(WindowFrameSpec::new(Range, UnboundedPreceding, CurrentRow))
            }
            WindowFunctionKind::Lead | WindowFunctionKind::Lag => {
                let offset = args
                    .get(1)
                    .and_then(|e| match e {
                        Expr::Literal {
                            value: LiteralValue::Int64(v),
                            ..
                        } => Some(*v as u64),
                        _ => None,
                    })
                    .unwrap_or(1);
                let bound = if self == WindowFunctionKind::Lead {
                    Following(offset)
                } else {
                    Preceding(offset)
                };
                Some(WindowFrameSpec::new(Rows, bound, bound))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneratorKind {
    Explode,
    PosExplode,
}

impl GeneratorKind {
    pub fn display_name(self) -> &'static str {
        match self {
            GeneratorKind::Explode => "explode",
            GeneratorKind::PosExplode => "posexplode",
        }
    }
}

/// The expression algebra the analyzer rewrites.
///
/// `Unresolved*` variants and `Star` are parser placeholders; the analyzer
/// guarantees none survives a successful analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal {
        value: LiteralValue,
        data_type: DataType,
    },
    Attribute(AttributeRef),
    UnresolvedAttribute {
        name_parts: Vec<String>,
    },
    UnresolvedFunction {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
    },
    UnresolvedGenerator {
        name: String,
        args: Vec<Expr>,
    },
    UnresolvedAlias {
        child: Box<Expr>,
    },
    UnresolvedExtractValue {
        child: Box<Expr>,
        field: Box<Expr>,
    },
    UnresolvedDeserializer {
        deserializer: Box<Expr>,
        inputs: Vec<AttributeRef>,
    },
    UnresolvedWindowExpression {
        child: Box<Expr>,
        name: String,
    },
    Star {
        qualifier: Option<String>,
    },
    Alias {
        child: Box<Expr>,
        name: String,
        id: ExprId,
    },
    MultiAlias {
        child: Box<Expr>,
        names: Vec<String>,
    },
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    Cast {
        expr: Box<Expr>,
        to_type: DataType,
    },
    UpCast {
        expr: Box<Expr>,
        to_type: DataType,
    },
    If {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    CreateStruct {
        children: Vec<Expr>,
    },
    CreateArray {
        children: Vec<Expr>,
    },
    GetStructField {
        child: Box<Expr>,
        ordinal: usize,
        name: String,
    },
    GetArrayItem {
        child: Box<Expr>,
        index: Box<Expr>,
    },
    GetMapValue {
        child: Box<Expr>,
        key: Box<Expr>,
    },
    ScalarFunction {
        name: String,
        args: Vec<Expr>,
        return_type: DataType,
    },
    ScalarUdf {
        name: String,
        args: Vec<Expr>,
        return_type: DataType,
        param_types: Vec<DataType>,
        /// Parameters whose host-side type cannot represent NULL; guarded by
        /// the UDF batch.
        primitive_params: Vec<bool>,
        deterministic: bool,
        /// Set once null guards have been installed around this call.
        null_safe: bool,
    },
    AggregateFunction {
        kind: AggregateKind,
        args: Vec<Expr>,
        ignore_nulls: bool,
    },
    AggregateExpression {
        func: Box<Expr>,
        mode: AggregateMode,
        distinct: bool,
        result_id: ExprId,
    },
    WindowFunction {
        kind: WindowFunctionKind,
        args: Vec<Expr>,
    },
    WindowExpression {
        function: Box<Expr>,
        spec: WindowSpec,
    },
    Generator {
        kind: GeneratorKind,
        args: Vec<Expr>,
    },
    Grouping {
        child: Box<Expr>,
    },
    GroupingId {
        children: Vec<Expr>,
    },
    Cube {
        exprs: Vec<Expr>,
    },
    Rollup {
        exprs: Vec<Expr>,
    },
    TimeWindow {
        time_column: Box<Expr>,
        window_duration: i64,
        slide_duration: i64,
        start_time: i64,
    },
    BoundReference {
        ordinal: usize,
        data_type: DataType,
        nullable: bool,
    },
    NewInstance {
        class_name: String,
        args: Vec<Expr>,
        needs_outer_pointer: bool,
        outer_pointer: Option<String>,
        data_type: DataType,
    },
    Rand {
        seed: i64,
    },
    ScalarSubquery {
        plan: Box<LogicalPlan>,
    },
    Exists {
        plan: Box<LogicalPlan>,
    },
    InSubquery {
        value: Box<Expr>,
        plan: Box<LogicalPlan>,
    },
}

impl Expr {
    // ---- constructors -----------------------------------------------------

    pub fn int(v: i64) -> Expr {
        Expr::Literal {
            value: LiteralValue::Int64(v),
            data_type: DataType::Int64,
        }
    }

    pub fn utf8(v: impl Into<String>) -> Expr {
        Expr::Literal {
            value: LiteralValue::Utf8(v.into()),
            data_type: DataType::Utf8,
        }
    }

    pub fn boolean(v: bool) -> Expr {
        Expr::Literal {
            value: LiteralValue::Boolean(v),
            data_type: DataType::Boolean,
        }
    }

    pub fn null(data_type: DataType) -> Expr {
        Expr::Literal {
            value: LiteralValue::Null,
            data_type,
        }
    }

    pub fn col(name: impl Into<String>) -> Expr {
        Expr::UnresolvedAttribute {
            name_parts: vec![name.into()],
        }
    }

    pub fn qualified_col(qualifier: impl Into<String>, name: impl Into<String>) -> Expr {
        Expr::UnresolvedAttribute {
            name_parts: vec![qualifier.into(), name.into()],
        }
    }

    /// Wrap in an [`Expr::Alias`] with a fresh id.
    pub fn alias(self, name: impl Into<String>) -> Expr {
        Expr::Alias {
            child: Box::new(self),
            name: name.into(),
            id: ExprId::fresh(),
        }
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
        Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::binary(left, BinaryOp::Eq, right)
    }

    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Expr, right: Expr) -> Expr {
        Expr::Or(Box::new(left), Box::new(right))
    }

    pub fn if_else(condition: Expr, then_expr: Expr, else_expr: Expr) -> Expr {
        Expr::If {
            condition: Box::new(condition),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        }
    }

    pub fn cast(self, to_type: DataType) -> Expr {
        Expr::Cast {
            expr: Box::new(self),
            to_type,
        }
    }

    // ---- traversal --------------------------------------------------------

    /// Immediate expression children. Subquery plans are not expression
    /// children; the subquery rule descends into them explicitly.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal { .. }
            | Expr::Attribute(_)
            | Expr::UnresolvedAttribute { .. }
            | Expr::Star { .. }
            | Expr::BoundReference { .. }
            | Expr::Rand { .. }
            | Expr::ScalarSubquery { .. }
            | Expr::Exists { .. } => vec![],
            Expr::UnresolvedFunction { args, .. }
            | Expr::UnresolvedGenerator { args, .. }
            | Expr::ScalarFunction { args, .. }
            | Expr::ScalarUdf { args, .. }
            | Expr::AggregateFunction { args, .. }
            | Expr::WindowFunction { args, .. }
            | Expr::Generator { args, .. }
            | Expr::NewInstance { args, .. } => args.iter().collect(),
            Expr::UnresolvedAlias { child }
            | Expr::Alias { child, .. }
            | Expr::MultiAlias { child, .. }
            | Expr::Grouping { child }
            | Expr::GetStructField { child, .. } => vec![child.as_ref()],
            Expr::UnresolvedExtractValue { child, field } => {
                vec![child.as_ref(), field.as_ref()]
            }
            Expr::UnresolvedDeserializer { deserializer, .. } => vec![deserializer.as_ref()],
            Expr::UnresolvedWindowExpression { child, .. } => vec![child.as_ref()],
            Expr::BinaryOp { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::And(a, b) | Expr::Or(a, b) => vec![a.as_ref(), b.as_ref()],
            Expr::Not(e) | Expr::IsNull(e) | Expr::IsNotNull(e) => vec![e.as_ref()],
            Expr::Cast { expr, .. } | Expr::UpCast { expr, .. } => vec![expr.as_ref()],
            Expr::If {
                condition,
                then_expr,
                else_expr,
            } => vec![condition.as_ref(), then_expr.as_ref(), else_expr.as_ref()],
            Expr::CreateStruct { children }
            | Expr::CreateArray { children }
            | Expr::GroupingId { children } => children.iter().collect(),
            Expr::GetArrayItem { child, index } => vec![child.as_ref(), index.as_ref()],
            Expr::GetMapValue { child, key } => vec![child.as_ref(), key.as_ref()],
            Expr::AggregateExpression { func, .. } => vec![func.as_ref()],
            Expr::WindowExpression { function, spec } => {
                let mut out: Vec<&Expr> = vec![function.as_ref()];
                out.extend(spec.partition_by.iter());
                out.extend(spec.order_by.iter().map(|s| &s.expr));
                out
            }
            Expr::Cube { exprs } | Expr::Rollup { exprs } => exprs.iter().collect(),
            Expr::TimeWindow { time_column, .. } => vec![time_column.as_ref()],
            Expr::InSubquery { value, .. } => vec![value.as_ref()],
        }
    }

    /// Rebuild this node with each expression child passed through `f`.
    pub fn map_children<F>(self, f: &mut F) -> Result<Expr>
    where
        F: FnMut(Expr) -> Result<Expr>,
    {
        fn fbox<F>(e: Box<Expr>, f: &mut F) -> Result<Box<Expr>>
        where
            F: FnMut(Expr) -> Result<Expr>,
        {
            Ok(Box::new(f(*e)?))
        }
        fn fvec<F>(es: Vec<Expr>, f: &mut F) -> Result<Vec<Expr>>
        where
            F: FnMut(Expr) -> Result<Expr>,
        {
            es.into_iter().map(f).collect()
        }

        Ok(match self {
            leaf @ (Expr::Literal { .. }
            | Expr::Attribute(_)
            | Expr::UnresolvedAttribute { .. }
            | Expr::Star { .. }
            | Expr::BoundReference { .. }
            | Expr::Rand { .. }
            | Expr::ScalarSubquery { .. }
            | Expr::Exists { .. }) => leaf,
            Expr::UnresolvedFunction {
                name,
                args,
                distinct,
            } => Expr::UnresolvedFunction {
                name,
                args: fvec(args, f)?,
                distinct,
            },
            Expr::UnresolvedGenerator { name, args } => Expr::UnresolvedGenerator {
                name,
                args: fvec(args, f)?,
            },
            Expr::UnresolvedAlias { child } => Expr::UnresolvedAlias {
                child: fbox(child, f)?,
            },
            Expr::UnresolvedExtractValue { child, field } => Expr::UnresolvedExtractValue {
                child: fbox(child, f)?,
                field: fbox(field, f)?,
            },
            Expr::UnresolvedDeserializer {
                deserializer,
                inputs,
            } => Expr::UnresolvedDeserializer {
                deserializer: fbox(deserializer, f)?,
                inputs,
            },
            Expr::UnresolvedWindowExpression { child, name } => Expr::UnresolvedWindowExpression {
                child: fbox(child, f)?,
                name,
            },
            Expr::Alias { child, name, id } => Expr::Alias {
                child: fbox(child, f)?,
                name,
                id,
            },
            Expr::MultiAlias { child, names } => Expr::MultiAlias {
                child: fbox(child, f)?,
                names,
            },
            Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
                left: fbox(left, f)?,
                op,
                right: fbox(right, f)?,
            },
            Expr::And(a, b) => Expr::And(fbox(a, f)?, fbox(b, f)?),
            Expr::Or(a, b) => Expr::Or(fbox(a, f)?, fbox(b, f)?),
            Expr::Not(e) => Expr::Not(fbox(e, f)?),
            Expr::IsNull(e) => Expr::IsNull(fbox(e, f)?),
            Expr::IsNotNull(e) => Expr::IsNotNull(fbox(e, f)?),
            Expr::Cast { expr, to_type } => Expr::Cast {
                expr: fbox(expr, f)?,
                to_type,
            },
            Expr::UpCast { expr, to_type } => Expr::UpCast {
                expr: fbox(expr, f)?,
                to_type,
            },
            Expr::If {
                condition,
                then_expr,
                else_expr,
            } => Expr::If {
                condition: fbox(condition, f)?,
                then_expr: fbox(then_expr, f)?,
                else_expr: fbox(else_expr, f)?,
            },
            Expr::CreateStruct { children } => Expr::CreateStruct {
                children: fvec(children, f)?,
            },
            Expr::CreateArray { children } => Expr::CreateArray {
                children: fvec(children, f)?,
            },
            Expr::GetStructField {
                child,
                ordinal,
                name,
            } => Expr::GetStructField {
                child: fbox(child, f)?,
                ordinal,
                name,
            },
            Expr::GetArrayItem { child, index } => Expr::GetArrayItem {
                child: fbox(child, f)?,
                index: fbox(index, f)?,
            },
            Expr::GetMapValue { child, key } => Expr::GetMapValue {
                child: fbox(child, f)?,
                key: fbox(key, f)?,
            },
            Expr::ScalarFunction {
                name,
                args,
                return_type,
            } => Expr::ScalarFunction {
                name,
                args: fvec(args, f)?,
                return_type,
            },
            Expr::ScalarUdf {
                name,
                args,
                return_type,
                param_types,
                primitive_params,
                deterministic,
                null_safe,
            } => Expr::ScalarUdf {
                name,
                args: fvec(args, f)?,
                return_type,
                param_types,
                primitive_params,
                deterministic,
                null_safe,
            },
            Expr::AggregateFunction {
                kind,
                args,
                ignore_nulls,
            } => Expr::AggregateFunction {
                kind,
                args: fvec(args, f)?,
                ignore_nulls,
            },
            Expr::AggregateExpression {
                func,
                mode,
                distinct,
                result_id,
            } => Expr::AggregateExpression {
                func: fbox(func, f)?,
                mode,
                distinct,
                result_id,
            },
            Expr::WindowFunction { kind, args } => Expr::WindowFunction {
                kind,
                args: fvec(args, f)?,
            },
            Expr::WindowExpression { function, spec } => {
                let WindowSpec {
                    partition_by,
                    order_by,
                    frame,
                } = spec;
                let order_by = order_by
                    .into_iter()
                    .map(|s| {
                        Ok(SortOrder {
                            expr: f(s.expr)?,
                            direction: s.direction,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Expr::WindowExpression {
                    function: fbox(function, f)?,
                    spec: WindowSpec {
                        partition_by: fvec(partition_by, f)?,
                        order_by,
                        frame,
                    },
                }
            }
            Expr::Generator { kind, args } => Expr::Generator {
                kind,
                args: fvec(args, f)?,
            },
            Expr::Grouping { child } => Expr::Grouping {
                child: fbox(child, f)?,
            },
            Expr::GroupingId { children } => Expr::GroupingId {
                children: fvec(children, f)?,
            },
            Expr::Cube { exprs } => Expr::Cube {
                exprs: fvec(exprs, f)?,
            },
            Expr::Rollup { exprs } => Expr::Rollup {
                exprs: fvec(exprs, f)?,
            },
            Expr::TimeWindow {
                time_column,
                window_duration,
                slide_duration,
                start_time,
            } => Expr::TimeWindow {
                time_column: fbox(time_column, f)?,
                window_duration,
                slide_duration,
                start_time,
            },
            Expr::NewInstance {
                class_name,
                args,
                needs_outer_pointer,
                outer_pointer,
                data_type,
            } => Expr::NewInstance {
                class_name,
                args: fvec(args, f)?,
                needs_outer_pointer,
                outer_pointer,
                data_type,
            },
            Expr::InSubquery { value, plan } => Expr::InSubquery {
                value: fbox(value, f)?,
                plan,
            },
        })
    }

    /// Post-order rewrite: children first, then this node.
    pub fn transform_up<F>(self, f: &mut F) -> Result<Expr>
    where
        F: FnMut(Expr) -> Result<Expr>,
    {
        let node = self.map_children(&mut |c| c.transform_up(&mut *f))?;
        f(node)
    }

    /// Pre-order rewrite: this node first, then the (possibly new) children.
    pub fn transform_down<F>(self, f: &mut F) -> Result<Expr>
    where
        F: FnMut(Expr) -> Result<Expr>,
    {
        let node = f(self)?;
        node.map_children(&mut |c| c.transform_down(&mut *f))
    }

    /// Pre-order visit of this expression tree.
    pub fn visit<F>(&self, f: &mut F)
    where
        F: FnMut(&Expr),
    {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// Whether any node in this tree satisfies the predicate.
    pub fn exists<F>(&self, f: &mut F) -> bool
    where
        F: FnMut(&Expr) -> bool,
    {
        let mut found = false;
        self.visit(&mut |e| {
            if f(e) {
                found = true;
            }
        });
        found
    }

    // ---- derived properties ------------------------------------------------

    /// Bottom-up resolution state. An expression is resolved when it carries
    /// concrete bindings and its children do too.
    pub fn resolved(&self) -> bool {
        match self {
            Expr::UnresolvedAttribute { .. }
            | Expr::UnresolvedFunction { .. }
            | Expr::UnresolvedGenerator { .. }
            | Expr::UnresolvedAlias { .. }
            | Expr::UnresolvedExtractValue { .. }
            | Expr::UnresolvedDeserializer { .. }
            | Expr::UnresolvedWindowExpression { .. }
            | Expr::Star { .. }
            | Expr::Cube { .. }
            | Expr::Rollup { .. }
            | Expr::MultiAlias { .. } => false,
            Expr::Attribute(_) | Expr::Literal { .. } | Expr::BoundReference { .. } => true,
            Expr::NewInstance {
                args,
                needs_outer_pointer,
                outer_pointer,
                ..
            } => args.iter().all(Expr::resolved) && (!needs_outer_pointer || outer_pointer.is_some()),
            Expr::ScalarSubquery { plan } => plan.resolved() && plan.output().len() == 1,
            Expr::Exists { plan } => plan.resolved(),
            Expr::InSubquery { value, plan } => value.resolved() && plan.resolved(),
            other => other.children().iter().all(|c| c.resolved()),
        }
    }

    /// Concrete output type. Only meaningful on resolved expressions.
    pub fn data_type(&self) -> Result<DataType> {
        match self {
            Expr::Literal { data_type, .. } => Ok(data_type.clone()),
            Expr::Attribute(a) => Ok(a.data_type.clone()),
            Expr::Alias { child, .. }
            | Expr::MultiAlias { child, .. }
            | Expr::UnresolvedAlias { child } => child.data_type(),
            Expr::BinaryOp { left, op, .. } => {
                if op.is_comparison() {
                    Ok(DataType::Boolean)
                } else {
                    left.data_type()
                }
            }
            Expr::And(_, _)
            | Expr::Or(_, _)
            | Expr::Not(_)
            | Expr::IsNull(_)
            | Expr::IsNotNull(_)
            | Expr::Exists { .. }
            | Expr::InSubquery { .. } => Ok(DataType::Boolean),
            Expr::Cast { to_type, .. } | Expr::UpCast { to_type, .. } => Ok(to_type.clone()),
            Expr::If { then_expr, .. } => then_expr.data_type(),
            Expr::CreateStruct { children } => {
                let fields = children
                    .iter()
                    .enumerate()
                    .map(|(i, c)| {
                        let name = c.name().unwrap_or_else(|| format!("col{}", i + 1));
                        Ok(Field::new(name, c.data_type()?, c.nullable()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(DataType::Struct(Fields::from(fields)))
            }
            Expr::CreateArray { children } => {
                let elem = children
                    .first()
                    .map(Expr::data_type)
                    .transpose()?
                    .unwrap_or(DataType::Null);
                Ok(DataType::List(std::sync::Arc::new(Field::new(
                    "item", elem, true,
                ))))
            }
            Expr::GetStructField { child, ordinal, .. } => match child.data_type()? {
                DataType::Struct(fields) => Ok(fields[*ordinal].data_type().clone()),
                other => Err(FlintError::Internal(format!(
                    "GetStructField over non-struct type {other:?}"
                ))),
            },
            Expr::GetArrayItem { child, .. } => match child.data_type()? {
                DataType::List(field) | DataType::LargeList(field) => {
                    Ok(field.data_type().clone())
                }
                other => Err(FlintError::Internal(format!(
                    "GetArrayItem over non-list type {other:?}"
                ))),
            },
            Expr::GetMapValue { child, .. } => match child.data_type()? {
                DataType::Map(entries, _) => match entries.data_type() {
                    DataType::Struct(kv) => Ok(kv[1].data_type().clone()),
                    other => Err(FlintError::Internal(format!(
                        "malformed map entry type {other:?}"
                    ))),
                },
                other => Err(FlintError::Internal(format!(
                    "GetMapValue over non-map type {other:?}"
                ))),
            },
            Expr::ScalarFunction { return_type, .. } => Ok(return_type.clone()),
            Expr::ScalarUdf { return_type, .. } => Ok(return_type.clone()),
            Expr::AggregateFunction { kind, args, .. } => match kind {
                AggregateKind::Count => Ok(DataType::Int64),
                AggregateKind::Avg => Ok(DataType::Float64),
                AggregateKind::Sum => match args.first().map(Expr::data_type).transpose()? {
                    Some(DataType::Float32) | Some(DataType::Float64) => Ok(DataType::Float64),
                    Some(_) => Ok(DataType::Int64),
                    None => Ok(DataType::Int64),
                },
                AggregateKind::Min
                | AggregateKind::Max
                | AggregateKind::First
                | AggregateKind::Last => args
                    .first()
                    .map(Expr::data_type)
                    .transpose()?
                    .ok_or_else(|| {
                        FlintError::Internal(format!(
                            "{} called without arguments",
                            kind.display_name()
                        ))
                    }),
            },
            Expr::AggregateExpression { func, .. } => func.data_type(),
            Expr::WindowFunction { kind, args } => match kind {
                WindowFunctionKind::Lead | WindowFunctionKind::Lag => args
                    .first()
                    .map(Expr::data_type)
                    .transpose()?
                    .ok_or_else(|| {
                        FlintError::Internal(format!(
                            "{} called without arguments",
                            kind.display_name()
                        ))
                    }),
                _ => Ok(DataType::Int64),
            },
            Expr::WindowExpression { function, .. } => function.data_type(),
            Expr::Generator { .. } => Err(FlintError::Internal(
                "generators have a row schema, not a data type".to_string(),
            )),
            Expr::Grouping { .. } => Ok(DataType::Int8),
            Expr::GroupingId { .. } => Ok(DataType::Int64),
            Expr::TimeWindow { .. } => Ok(time_window_type()),
            Expr::BoundReference { data_type, .. } => Ok(data_type.clone()),
            Expr::NewInstance { data_type, .. } => Ok(data_type.clone()),
            Expr::Rand { .. } => Ok(DataType::Float64),
            Expr::ScalarSubquery { plan } => plan
                .output()
                .first()
                .map(|a| a.data_type.clone())
                .ok_or_else(|| {
                    FlintError::Internal("scalar subquery with empty output".to_string())
                }),
            Expr::UnresolvedAttribute { .. }
            | Expr::UnresolvedFunction { .. }
            | Expr::UnresolvedGenerator { .. }
            | Expr::UnresolvedExtractValue { .. }
            | Expr::UnresolvedDeserializer { .. }
            | Expr::UnresolvedWindowExpression { .. }
            | Expr::Star { .. }
            | Expr::Cube { .. }
            | Expr::Rollup { .. } => Err(FlintError::Internal(format!(
                "data_type called on unresolved expression {self:?}"
            ))),
        }
    }

    pub fn nullable(&self) -> bool {
        match self {
            Expr::Literal { value, .. } => matches!(value, LiteralValue::Null),
            Expr::Attribute(a) => a.nullable,
            Expr::Alias { child, .. } | Expr::UnresolvedAlias { child } => child.nullable(),
            Expr::IsNull(_) | Expr::IsNotNull(_) | Expr::Exists { .. } => false,
            Expr::AggregateFunction { kind, .. } => !matches!(kind, AggregateKind::Count),
            Expr::AggregateExpression { func, .. } => func.nullable(),
            Expr::WindowFunction { kind, .. } => {
                matches!(kind, WindowFunctionKind::Lead | WindowFunctionKind::Lag)
            }
            Expr::WindowExpression { function, .. } => function.nullable(),
            Expr::Rand { .. } => false,
            Expr::TimeWindow { .. } => false,
            Expr::BoundReference { nullable, .. } => *nullable,
            Expr::GetStructField { child, ordinal, .. } => match child.data_type() {
                Ok(DataType::Struct(fields)) => {
                    child.nullable() || fields[*ordinal].is_nullable()
                }
                _ => true,
            },
            _ => true,
        }
    }

    /// Whether this expression can be evaluated without input rows.
    pub fn foldable(&self) -> bool {
        match self {
            Expr::Literal { .. } => true,
            Expr::Attribute(_)
            | Expr::BoundReference { .. }
            | Expr::Rand { .. }
            | Expr::ScalarUdf { .. }
            | Expr::AggregateFunction { .. }
            | Expr::AggregateExpression { .. }
            | Expr::WindowFunction { .. }
            | Expr::WindowExpression { .. }
            | Expr::Generator { .. }
            | Expr::ScalarSubquery { .. }
            | Expr::Exists { .. }
            | Expr::InSubquery { .. }
            | Expr::UnresolvedAttribute { .. }
            | Expr::UnresolvedFunction { .. }
            | Expr::UnresolvedGenerator { .. }
            | Expr::UnresolvedDeserializer { .. }
            | Expr::Star { .. } => false,
            other => {
                let children = other.children();
                !children.is_empty() && children.iter().all(|c| c.foldable())
            }
        }
    }

    /// False for expressions whose value varies between evaluations of the
    /// same input row.
    pub fn deterministic(&self) -> bool {
        match self {
            Expr::Rand { .. } => false,
            Expr::ScalarUdf { deterministic, .. } => *deterministic,
            other => other.children().iter().all(|c| c.deterministic()),
        }
    }

    /// Attribute leaves this expression depends on.
    pub fn references(&self) -> AttributeSet {
        let mut set = AttributeSet::default();
        self.visit(&mut |e| {
            if let Expr::Attribute(a) = e {
                set.insert(a.clone());
            }
        });
        set
    }

    /// Output name, for named expressions.
    pub fn name(&self) -> Option<String> {
        match self {
            Expr::Attribute(a) => Some(a.name.clone()),
            Expr::Alias { name, .. } => Some(name.clone()),
            _ => None,
        }
    }

    /// The attribute this expression produces, if it is a named expression
    /// with a known type.
    pub fn to_attribute(&self) -> Option<AttributeRef> {
        match self {
            Expr::Attribute(a) => Some(a.clone()),
            Expr::Alias { child, name, id } => Some(AttributeRef {
                name: name.clone(),
                data_type: child.data_type().ok()?,
                nullable: child.nullable(),
                id: *id,
                qualifier: None,
            }),
            _ => None,
        }
    }

    // ---- semantic equality -------------------------------------------------

    /// Normalized copy for comparison modulo cosmetic id/name differences:
    /// alias ids are zeroed and attribute names/qualifiers erased, while
    /// attribute ids (the real identity of a column) are kept.
    pub fn canonicalized(&self) -> Expr {
        self.clone()
            .transform_up(&mut |e| {
                Ok(match e {
                    Expr::Alias { child, .. } => Expr::Alias {
                        child,
                        name: String::new(),
                        id: ExprId(0),
                    },
                    Expr::Attribute(a) => Expr::Attribute(AttributeRef {
                        name: String::new(),
                        qualifier: None,
                        ..a
                    }),
                    Expr::AggregateExpression {
                        func,
                        mode,
                        distinct,
                        ..
                    } => Expr::AggregateExpression {
                        func,
                        mode,
                        distinct,
                        result_id: ExprId(0),
                    },
                    other => other,
                })
            })
            .expect("canonicalization is infallible")
    }

    /// Structural equality up to attribute-id renaming of aliases.
    pub fn semantic_eq(&self, other: &Expr) -> bool {
        self.canonicalized() == other.canonicalized()
    }
}

/// Output type of a time window: `struct<start, end>` over microsecond
/// timestamps.
pub fn time_window_type() -> DataType {
    DataType::Struct(Fields::from(vec![
        Field::new("start", DataType::Timestamp(TimeUnit::Microsecond, None), false),
        Field::new("end", DataType::Timestamp(TimeUnit::Microsecond, None), false),
    ]))
}

/// Set of attributes keyed by expression id.
#[derive(Debug, Clone, Default)]
pub struct AttributeSet {
    attrs: Vec<AttributeRef>,
}

impl AttributeSet {
    pub fn from_attrs(attrs: impl IntoIterator<Item = AttributeRef>) -> Self {
        let mut set = Self::default();
        for a in attrs {
            set.insert(a);
        }
        set
    }

    pub fn insert(&mut self, attr: AttributeRef) {
        if !self.contains_id(attr.id) {
            self.attrs.push(attr);
        }
    }

    pub fn contains_id(&self, id: ExprId) -> bool {
        self.attrs.iter().any(|a| a.id == id)
    }

    pub fn contains(&self, attr: &AttributeRef) -> bool {
        self.contains_id(attr.id)
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeRef> {
        self.attrs.iter()
    }

    pub fn union(&self, other: &AttributeSet) -> AttributeSet {
        let mut out = self.clone();
        for a in other.iter() {
            out.insert(a.clone());
        }
        out
    }

    /// Attributes of `self` not present in `other`.
    pub fn subtract(&self, other: &AttributeSet) -> AttributeSet {
        AttributeSet {
            attrs: self
                .attrs
                .iter()
                .filter(|a| !other.contains_id(a.id))
                .cloned()
                .collect(),
        }
    }

    pub fn intersect(&self, other: &AttributeSet) -> AttributeSet {
        AttributeSet {
            attrs: self
                .attrs
                .iter()
                .filter(|a| other.contains_id(a.id))
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(name: &str, dt: DataType) -> AttributeRef {
        AttributeRef::new(name, dt, true)
    }

    #[test]
    fn transform_up_rewrites_bottom_first() {
        let e = Expr::and(Expr::col("a"), Expr::col("b"));
        let rewritten = e
            .transform_up(&mut |e| {
                Ok(match e {
                    Expr::UnresolvedAttribute { .. } => Expr::boolean(true),
                    other => other,
                })
            })
            .unwrap();
        assert_eq!(rewritten, Expr::and(Expr::boolean(true), Expr::boolean(true)));
    }

    #[test]
    fn references_collects_by_id() {
        let a = attr("a", DataType::Int64);
        let e = Expr::and(
            Expr::eq(Expr::Attribute(a.clone()), Expr::int(1)),
            Expr::IsNotNull(Box::new(Expr::Attribute(a.clone()))),
        );
        let refs = e.references();
        assert_eq!(refs.len(), 1);
        assert!(refs.contains(&a));
    }

    #[test]
    fn semantic_eq_ignores_alias_ids_and_attr_names() {
        let a = attr("a", DataType::Int64);
        let mut renamed = a.clone();
        renamed.name = "other_spelling".to_string();

        let sum1 = Expr::AggregateFunction {
            kind: AggregateKind::Sum,
            args: vec![Expr::Attribute(a.clone())],
            ignore_nulls: false,
        }
        .alias("x");
        let sum2 = Expr::AggregateFunction {
            kind: AggregateKind::Sum,
            args: vec![Expr::Attribute(renamed)],
            ignore_nulls: false,
        }
        .alias("y");
        assert!(sum1.semantic_eq(&sum2));

        let other = attr("a", DataType::Int64);
        let sum3 = Expr::AggregateFunction {
            kind: AggregateKind::Sum,
            args: vec![Expr::Attribute(other)],
            ignore_nulls: false,
        }
        .alias("x");
        assert!(!sum1.semantic_eq(&sum3), "different attribute ids differ");
    }

    #[test]
    fn window_expression_children_cover_partition_and_order() {
        let a = attr("a", DataType::Int64);
        let b = attr("b", DataType::Int64);
        let we = Expr::WindowExpression {
            function: Box::new(Expr::WindowFunction {
                kind: WindowFunctionKind::RowNumber,
                args: vec![],
            }),
            spec: WindowSpec {
                partition_by: vec![Expr::Attribute(a.clone())],
                order_by: vec![SortOrder::asc(Expr::Attribute(b.clone()))],
                frame: None,
            },
        };
        let refs = we.references();
        assert!(refs.contains(&a));
        assert!(refs.contains(&b));
    }

    #[test]
    fn foldable_literal_trees_only() {
        assert!(Expr::binary(Expr::int(1), BinaryOp::Plus, Expr::int(2)).foldable());
        assert!(!Expr::Attribute(attr("a", DataType::Int64)).foldable());
        assert!(!Expr::Rand { seed: 42 }.foldable());
    }

    #[test]
    fn rand_is_nondeterministic() {
        let e = Expr::binary(Expr::Rand { seed: 1 }, BinaryOp::Plus, Expr::int(3));
        assert!(!e.deterministic());
        assert!(Expr::int(3).deterministic());
    }
}
