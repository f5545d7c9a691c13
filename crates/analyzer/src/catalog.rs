use std::collections::HashMap;
use std::fmt;

use arrow_schema::DataType;
use flint_common::{FlintError, Result};
use serde::{Deserialize, Serialize};

use crate::expr::{
    AggregateKind, AttributeRef, Expr, GeneratorKind, LiteralValue, WindowFunctionKind,
};
use crate::logical_plan::LogicalPlan;

/// Possibly database-qualified table identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId {
    pub database: Option<String>,
    pub table: String,
}

impl TableId {
    pub fn bare(table: impl Into<String>) -> Self {
        Self {
            database: None,
            table: table.into(),
        }
    }

    pub fn qualified(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: Some(database.into()),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.database {
            Some(db) => write!(f, "{db}.{}", self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

/// The analyzer's view of table and function metadata.
///
/// Lookups are synchronous and pure for the duration of one analysis; the
/// relation returned for a given id must produce stable attribute ids so two
/// references to the same table start out identical and are told apart by
/// de-duplication.
pub trait Catalog: Send + Sync {
    /// Resolve a table id to a relation plan, or [`FlintError::NoSuchTable`].
    fn lookup_relation(&self, table: &TableId) -> Result<LogicalPlan>;

    /// Bind a function name applied to already-resolved arguments, or
    /// [`FlintError::NoSuchFunction`].
    fn lookup_function(&self, name: &str, args: Vec<Expr>) -> Result<Expr>;

    fn database_exists(&self, database: &str) -> bool;

    fn table_exists(&self, table: &TableId) -> bool;
}

/// Registration-time description of a scalar UDF.
///
/// `primitive_params` marks parameters whose host-side representation cannot
/// hold NULL; the analyzer wraps calls with null guards for those.
#[derive(Debug, Clone)]
pub struct UdfDef {
    pub name: String,
    pub param_types: Vec<DataType>,
    pub return_type: DataType,
    pub primitive_params: Vec<bool>,
    pub deterministic: bool,
}

/// In-memory catalog: registered tables plus the builtin function registry.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    databases: HashMap<String, HashMap<String, Vec<AttributeRef>>>,
    udfs: HashMap<String, UdfDef>,
}

const DEFAULT_DATABASE: &str = "default";

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table in the default database. Attribute ids are minted
    /// here, once, so repeated lookups return the same columns.
    pub fn register_table(&mut self, name: &str, columns: Vec<(&str, DataType, bool)>) {
        self.register_table_in(DEFAULT_DATABASE, name, columns);
    }

    pub fn register_table_in(
        &mut self,
        database: &str,
        name: &str,
        columns: Vec<(&str, DataType, bool)>,
    ) {
        let attrs = columns
            .into_iter()
            .map(|(col, dt, nullable)| {
                AttributeRef::new(col, dt, nullable).with_qualifier(name)
            })
            .collect();
        self.databases
            .entry(database.to_ascii_lowercase())
            .or_default()
            .insert(name.to_ascii_lowercase(), attrs);
    }

    pub fn register_udf(&mut self, def: UdfDef) {
        self.udfs.insert(def.name.to_ascii_lowercase(), def);
    }

    fn table_attrs(&self, table: &TableId) -> Option<&Vec<AttributeRef>> {
        let db = table
            .database
            .as_deref()
            .unwrap_or(DEFAULT_DATABASE)
            .to_ascii_lowercase();
        self.databases
            .get(&db)?
            .get(&table.table.to_ascii_lowercase())
    }
}

impl Catalog for MemoryCatalog {
    fn lookup_relation(&self, table: &TableId) -> Result<LogicalPlan> {
        match self.table_attrs(table) {
            Some(attrs) => Ok(LogicalPlan::Relation {
                table: table.table.clone(),
                output: attrs.clone(),
            }),
            None => Err(FlintError::NoSuchTable(table.to_string())),
        }
    }

    fn lookup_function(&self, name: &str, args: Vec<Expr>) -> Result<Expr> {
        bind_function(name, args, &self.udfs)
    }

    fn database_exists(&self, database: &str) -> bool {
        self.databases
            .contains_key(&database.to_ascii_lowercase())
    }

    fn table_exists(&self, table: &TableId) -> bool {
        self.table_attrs(table).is_some()
    }
}

fn expect_arity(name: &str, args: &[Expr], expected: std::ops::RangeInclusive<usize>) -> Result<()> {
    if expected.contains(&args.len()) {
        Ok(())
    } else {
        Err(FlintError::analysis(format!(
            "Invalid number of arguments for function {name}"
        )))
    }
}

fn bind_function(name: &str, args: Vec<Expr>, udfs: &HashMap<String, UdfDef>) -> Result<Expr> {
    let lowered = name.to_ascii_lowercase();
    let aggregate = |kind: AggregateKind, args: Vec<Expr>| Expr::AggregateFunction {
        kind,
        args,
        ignore_nulls: false,
    };
    match lowered.as_str() {
        "sum" | "min" | "max" | "avg" => {
            expect_arity(&lowered, &args, 1..=1)?;
            let kind = match lowered.as_str() {
                "sum" => AggregateKind::Sum,
                "min" => AggregateKind::Min,
                "max" => AggregateKind::Max,
                _ => AggregateKind::Avg,
            };
            Ok(aggregate(kind, args))
        }
        "count" => {
            expect_arity(&lowered, &args, 1..=usize::MAX)?;
            Ok(aggregate(AggregateKind::Count, args))
        }
        "first" | "last" => {
            expect_arity(&lowered, &args, 1..=1)?;
            let kind = if lowered == "first" {
                AggregateKind::First
            } else {
                AggregateKind::Last
            };
            Ok(aggregate(kind, args))
        }
        "explode" | "posexplode" => {
            expect_arity(&lowered, &args, 1..=1)?;
            let kind = if lowered == "explode" {
                GeneratorKind::Explode
            } else {
                GeneratorKind::PosExplode
            };
            Ok(Expr::Generator { kind, args })
        }
        "row_number" | "rank" | "dense_rank" => {
            expect_arity(&lowered, &args, 0..=0)?;
            let kind = match lowered.as_str() {
                "row_number" => WindowFunctionKind::RowNumber,
                "rank" => WindowFunctionKind::Rank,
                _ => WindowFunctionKind::DenseRank,
            };
            Ok(Expr::WindowFunction { kind, args })
        }
        "ntile" => {
            expect_arity(&lowered, &args, 1..=1)?;
            Ok(Expr::WindowFunction {
                kind: WindowFunctionKind::NTile,
                args,
            })
        }
        "lead" | "lag" => {
            expect_arity(&lowered, &args, 1..=3)?;
            let kind = if lowered == "lead" {
                WindowFunctionKind::Lead
            } else {
                WindowFunctionKind::Lag
            };
            Ok(Expr::WindowFunction { kind, args })
        }
        "struct" => {
            expect_arity(&lowered, &args, 1..=usize::MAX)?;
            Ok(Expr::CreateStruct { children: args })
        }
        "array" => {
            expect_arity(&lowered, &args, 1..=usize::MAX)?;
            Ok(Expr::CreateArray { children: args })
        }
        "rand" => {
            expect_arity(&lowered, &args, 0..=1)?;
            let seed = match args.first() {
                Some(Expr::Literal {
                    value: LiteralValue::Int64(v),
                    ..
                }) => *v,
                _ => 0,
            };
            Ok(Expr::Rand { seed })
        }
        "grouping" => {
            expect_arity(&lowered, &args, 1..=1)?;
            let mut args = args;
            Ok(Expr::Grouping {
                child: Box::new(args.remove(0)),
            })
        }
        "grouping_id" => Ok(Expr::GroupingId { children: args }),
        "abs" => {
            expect_arity(&lowered, &args, 1..=1)?;
            let return_type = args[0].data_type()?;
            Ok(Expr::ScalarFunction {
                name: lowered,
                args,
                return_type,
            })
        }
        "upper" | "lower" => {
            expect_arity(&lowered, &args, 1..=1)?;
            Ok(Expr::ScalarFunction {
                name: lowered,
                args,
                return_type: DataType::Utf8,
            })
        }
        "length" | "ceil" | "hash" => {
            let max = if lowered == "hash" { usize::MAX } else { 1 };
            expect_arity(&lowered, &args, 1..=max)?;
            Ok(Expr::ScalarFunction {
                name: lowered,
                args,
                return_type: DataType::Int64,
            })
        }
        "coalesce" => {
            expect_arity(&lowered, &args, 1..=usize::MAX)?;
            let return_type = args[0].data_type()?;
            Ok(Expr::ScalarFunction {
                name: lowered,
                args,
                return_type,
            })
        }
        _ => match udfs.get(&lowered) {
            Some(def) => {
                expect_arity(&lowered, &args, def.param_types.len()..=def.param_types.len())?;
                Ok(Expr::ScalarUdf {
                    name: def.name.clone(),
                    args,
                    return_type: def.return_type.clone(),
                    param_types: def.param_types.clone(),
                    primitive_params: def.primitive_params.clone(),
                    deterministic: def.deterministic,
                    null_safe: false,
                })
            }
            None => Err(FlintError::NoSuchFunction(name.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> MemoryCatalog {
        let mut cat = MemoryCatalog::new();
        cat.register_table(
            "t",
            vec![("a", DataType::Int64, false), ("b", DataType::Utf8, true)],
        );
        cat
    }

    #[test]
    fn relation_lookup_is_id_stable() {
        let cat = catalog();
        let first = cat.lookup_relation(&TableId::bare("t")).unwrap();
        let second = cat.lookup_relation(&TableId::bare("T")).unwrap();
        assert_eq!(first.output(), second.output());
    }

    #[test]
    fn missing_table_reports_no_such_table() {
        let cat = catalog();
        let err = cat.lookup_relation(&TableId::bare("nope")).unwrap_err();
        assert!(matches!(err, FlintError::NoSuchTable(_)));
    }

    #[test]
    fn aggregate_arity_is_checked() {
        let cat = catalog();
        let err = cat
            .lookup_function("sum", vec![Expr::int(1), Expr::int(2)])
            .unwrap_err();
        assert!(err.to_string().contains("Invalid number of arguments"), "{err}");
    }

    #[test]
    fn udf_binding_carries_registration_metadata() {
        let mut cat = catalog();
        cat.register_udf(UdfDef {
            name: "plus_one".to_string(),
            param_types: vec![DataType::Int64],
            return_type: DataType::Int64,
            primitive_params: vec![true],
            deterministic: true,
        });
        let bound = cat
            .lookup_function("PLUS_ONE", vec![Expr::int(1)])
            .unwrap();
        match bound {
            Expr::ScalarUdf {
                primitive_params,
                null_safe,
                ..
            } => {
                assert_eq!(primitive_params, vec![true]);
                assert!(!null_safe);
            }
            other => panic!("expected udf, got {other:?}"),
        }
    }

    #[test]
    fn unknown_function_reports_no_such_function() {
        let cat = catalog();
        let err = cat.lookup_function("frobnicate", vec![]).unwrap_err();
        assert!(matches!(err, FlintError::NoSuchFunction(_)));
    }
}
