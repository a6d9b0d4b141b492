//! PostgreSQL backend over `tokio_postgres`.
//!
//! PostgreSQL only understands positional `$n` tokens, so the
//! [`StatementCompiler`](crate::compiler::StatementCompiler) numbers named
//! placeholders for this backend and every bound parameter arrives as
//! [`BindSlot::Position`]. [`WireValue`] adapts to the parameter type the server
//! inferred for its slot.

use crate::backend::{Backend, BindSlot, BoundParam};
use crate::config::DbConfig;
use crate::db::Db;
use crate::dialect::Dialect;
use crate::error::{BackendError, DbError, DbResult};
use crate::log::SQL_TARGET;
use crate::metadata::{ColumnDescription, MetadataSource};
use crate::source::Source;
use crate::value::WireValue;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::error::Error;
use tokio_postgres::types::{IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls, Row, Statement};

impl ToSql for WireValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, ToSqlError> {
        match self {
            WireValue::Null => Ok(IsNull::Yes),
            WireValue::Int(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
                Type::INT8 => v.to_sql(ty, out),
                Type::BOOL => (*v != 0).to_sql(ty, out),
                Type::OID => u32::try_from(*v)?.to_sql(ty, out),
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => (*v as f64).to_sql(ty, out),
                Type::NUMERIC => write_numeric(&v.to_string(), out),
                _ if is_text(ty) => v.to_string().as_str().to_sql(ty, out),
                _ => Err(format!("cannot bind an integer to a {ty} parameter").into()),
            },
            WireValue::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                Type::INT2 => i16::from(*b).to_sql(ty, out),
                Type::INT4 => i32::from(*b).to_sql(ty, out),
                Type::INT8 => i64::from(*b).to_sql(ty, out),
                _ if is_text(ty) => i32::from(*b).to_string().as_str().to_sql(ty, out),
                _ => Err(format!("cannot bind a boolean to a {ty} parameter").into()),
            },
            WireValue::Str(s) => match *ty {
                Type::INT2 => s.trim().parse::<i16>()?.to_sql(ty, out),
                Type::INT4 => s.trim().parse::<i32>()?.to_sql(ty, out),
                Type::INT8 => s.trim().parse::<i64>()?.to_sql(ty, out),
                Type::BOOL => match s.as_str() {
                    "1" | "t" | "true" => true.to_sql(ty, out),
                    "0" | "f" | "false" => false.to_sql(ty, out),
                    _ => Err(format!("cannot bind '{s}' to a boolean parameter").into()),
                },
                Type::FLOAT4 => s.trim().parse::<f32>()?.to_sql(ty, out),
                Type::FLOAT8 => s.trim().parse::<f64>()?.to_sql(ty, out),
                Type::NUMERIC => write_numeric(s.trim(), out),
                Type::DATE => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")?.to_sql(ty, out),
                Type::TIME => parse_time(s.trim())?.to_sql(ty, out),
                Type::TIMESTAMP => parse_timestamp(s.trim())?.to_sql(ty, out),
                Type::TIMESTAMPTZ => parse_timestamptz(s.trim())?.to_sql(ty, out),
                Type::JSON => {
                    out.extend_from_slice(s.as_bytes());
                    Ok(IsNull::No)
                }
                Type::JSONB => {
                    out.extend_from_slice(&[1]);
                    out.extend_from_slice(s.as_bytes());
                    Ok(IsNull::No)
                }
                _ if is_text(ty) => s.as_str().to_sql(ty, out),
                _ => Err(format!("cannot bind a string to a {ty} parameter; cast it in SQL").into()),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    tokio_postgres::types::to_sql_checked!();
}

type ToSqlError = Box<dyn Error + Sync + Send>;

/// Encode a decimal string in the binary NUMERIC format: base-10000 digit
/// groups with a weight, a sign and the display scale.
fn write_numeric(text: &str, out: &mut BytesMut) -> Result<IsNull, ToSqlError> {
    let (negative, unsigned) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let valid = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !valid(int_part) || !valid(frac_part) {
        return Err(format!("cannot bind '{text}' to a numeric parameter").into());
    }

    let int_part = int_part.trim_start_matches('0');
    let dscale = u16::try_from(frac_part.len())?;

    let int_pad = (4 - int_part.len() % 4) % 4;
    let frac_pad = (4 - frac_part.len() % 4) % 4;
    let digits_text = format!(
        "{}{int_part}{frac_part}{}",
        "0".repeat(int_pad),
        "0".repeat(frac_pad)
    );
    let mut groups: Vec<i16> = digits_text
        .as_bytes()
        .chunks(4)
        .map(|chunk| chunk.iter().fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0')))
        .collect();
    let mut weight = i16::try_from((int_part.len() + int_pad) / 4)? - 1;

    let leading = groups.iter().take_while(|g| **g == 0).count();
    groups.drain(..leading);
    weight -= i16::try_from(leading)?;
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }

    out.put_i16(i16::try_from(groups.len())?);
    out.put_i16(weight);
    out.put_u16(if negative && !groups.is_empty() { 0x4000 } else { 0x0000 });
    out.put_u16(dscale);
    for group in groups {
        out.put_i16(group);
    }
    Ok(IsNull::No)
}

fn parse_time(text: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
}

/// `YYYY-MM-DD[( |T)HH:MM[:SS[.fff]]]`; a bare date means midnight.
fn parse_timestamp(text: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(Ok)
        .unwrap_or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// RFC 3339 or `%Y-%m-%d %H:%M:%S%#z`; values without an offset are UTC.
fn parse_timestamptz(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| parse_timestamp(text).map(|naive| naive.and_utc()))
}

fn is_text(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    ) || ty.name() == "citext"
}

fn backend_error(err: tokio_postgres::Error) -> BackendError {
    match err.as_db_error() {
        Some(db_err) => BackendError::new(db_err.message()).with_code(db_err.code().code()),
        None => BackendError::new(err.to_string()),
    }
}

/// Order bound values by slot for the positional protocol.
fn positional_params(params: &[BoundParam]) -> Result<Vec<&(dyn ToSql + Sync)>, BackendError> {
    let mut slots: Vec<Option<&WireValue>> = vec![None; params.len()];
    for param in params {
        match &param.slot {
            BindSlot::Position(p) if *p >= 1 && *p <= params.len() => {
                slots[p - 1] = Some(&param.value);
            }
            BindSlot::Position(p) => {
                return Err(BackendError::new(format!(
                    "parameter position {p} is out of range 1..={}",
                    params.len()
                )));
            }
            BindSlot::Named(name) => {
                return Err(BackendError::new(format!(
                    "named parameter {name} is not supported by PostgreSQL"
                )));
            }
        }
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            v.map(|v| v as &(dyn ToSql + Sync))
                .ok_or_else(|| BackendError::new(format!("parameter ${} is not bound", i + 1)))
        })
        .collect()
}

impl Backend for Client {
    type Row = Row;
    type Statement = Statement;

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn prepare(&self, sql: &str) -> Result<Statement, BackendError> {
        Client::prepare(self, sql).await.map_err(backend_error)
    }

    async fn query_prepared(
        &self,
        stmt: &Statement,
        params: &[BoundParam],
    ) -> Result<Vec<Row>, BackendError> {
        let params = positional_params(params)?;
        Client::query(self, stmt, &params).await.map_err(backend_error)
    }

    async fn execute_prepared(
        &self,
        stmt: &Statement,
        params: &[BoundParam],
    ) -> Result<u64, BackendError> {
        let params = positional_params(params)?;
        Client::execute(self, stmt, &params).await.map_err(backend_error)
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, BackendError> {
        Client::query(self, sql, &[]).await.map_err(backend_error)
    }

    async fn execute(&self, sql: &str) -> Result<u64, BackendError> {
        Client::execute(self, sql, &[]).await.map_err(backend_error)
    }

    async fn begin_transaction(&self) -> Result<(), BackendError> {
        self.batch_execute("BEGIN").await.map_err(backend_error)
    }

    async fn commit(&self) -> Result<(), BackendError> {
        self.batch_execute("COMMIT").await.map_err(backend_error)
    }

    async fn rollback(&self) -> Result<(), BackendError> {
        self.batch_execute("ROLLBACK").await.map_err(backend_error)
    }

    async fn last_insert_id(&self) -> Result<i64, BackendError> {
        let row = Client::query_one(self, "SELECT lastval()", &[])
            .await
            .map_err(backend_error)?;
        row.try_get::<_, i64>(0)
            .map_err(|e| BackendError::new(e.to_string()))
    }
}

const DESCRIBE_SQL: &str = r#"
SELECT
  a.attname::text AS column_name,
  pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
  COALESCE(i.indisprimary, false) AS primary_key,
  (a.attidentity <> '' OR COALESCE(pg_get_expr(ad.adbin, ad.adrelid), '') LIKE 'nextval(%') AS auto_increment
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid
LEFT JOIN pg_catalog.pg_attrdef ad ON ad.adrelid = c.oid AND ad.adnum = a.attnum
LEFT JOIN pg_catalog.pg_index i ON i.indrelid = c.oid AND i.indisprimary AND a.attnum = ANY(i.indkey)
WHERE c.relname::text = $1
  AND n.nspname::text = COALESCE($2, current_schema()::text)
  AND a.attnum > 0
  AND NOT a.attisdropped
ORDER BY a.attnum
"#;

impl MetadataSource for Client {
    async fn describe(&self, source: &Source) -> DbResult<Vec<ColumnDescription>> {
        let describe_error = |message: String| DbError::Query {
            message,
            code: None,
            sql: format!("describe {}", source.table_name()),
        };

        let rows = Client::query(
            self,
            DESCRIBE_SQL,
            &[&source.table_name(), &source.schema_name()],
        )
        .await
        .map_err(|e| describe_error(backend_error(e).message))?;

        rows.iter()
            .map(|row| {
                Ok(ColumnDescription {
                    name: row.try_get("column_name").map_err(|e| describe_error(e.to_string()))?,
                    data_type: row.try_get("data_type").map_err(|e| describe_error(e.to_string()))?,
                    primary_key: row.try_get("primary_key").map_err(|e| describe_error(e.to_string()))?,
                    auto_increment: row
                        .try_get("auto_increment")
                        .map_err(|e| describe_error(e.to_string()))?,
                })
            })
            .collect()
    }
}

/// Open a connection for `config` and wrap it in a [`Db`].
///
/// The connection task is spawned onto the current tokio runtime; its failure is
/// logged on target `stmtkit.sql`.
pub async fn connect(config: &DbConfig) -> DbResult<Db<Client>> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| DbError::configuration("database_url is not set"))?;

    let (client, connection) = tokio_postgres::connect(url, NoTls)
        .await
        .map_err(|e| DbError::Connection(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!(target: SQL_TARGET, error = %e, "connection error");
        }
    });

    Ok(Db::new(client).with_config(config.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_adapts_to_declared_type() {
        let mut out = BytesMut::new();
        WireValue::Int(7).to_sql(&Type::INT4, &mut out).unwrap();
        assert_eq!(&out[..], &7i32.to_be_bytes());

        let mut out = BytesMut::new();
        WireValue::Int(7).to_sql(&Type::TEXT, &mut out).unwrap();
        assert_eq!(&out[..], b"7");

        let mut out = BytesMut::new();
        assert!(WireValue::Int(70_000).to_sql(&Type::INT2, &mut out).is_err());
    }

    fn numeric_bytes(text: &str) -> Vec<u8> {
        let mut out = BytesMut::new();
        write_numeric(text, &mut out).unwrap();
        out.to_vec()
    }

    fn numeric_header(ndigits: i16, weight: i16, sign: u16, dscale: u16, digits: &[i16]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ndigits.to_be_bytes());
        out.extend_from_slice(&weight.to_be_bytes());
        out.extend_from_slice(&sign.to_be_bytes());
        out.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            out.extend_from_slice(&d.to_be_bytes());
        }
        out
    }

    #[test]
    fn int_binds_to_numeric_and_float() {
        let mut out = BytesMut::new();
        WireValue::Int(10).to_sql(&Type::NUMERIC, &mut out).unwrap();
        assert_eq!(&out[..], &numeric_header(1, 0, 0, 0, &[10])[..]);

        let mut out = BytesMut::new();
        WireValue::Int(10).to_sql(&Type::FLOAT4, &mut out).unwrap();
        assert_eq!(&out[..], &10f32.to_be_bytes());
    }

    #[test]
    fn numeric_encoding() {
        assert_eq!(numeric_bytes("123456.5"), numeric_header(3, 1, 0, 1, &[12, 3456, 5000]));
        assert_eq!(numeric_bytes("-0.0001"), numeric_header(1, -1, 0x4000, 4, &[1]));
        assert_eq!(numeric_bytes("0.00"), numeric_header(0, 0, 0, 2, &[]));
        assert_eq!(numeric_bytes("20000"), numeric_header(1, 1, 0, 0, &[2]));
        assert_eq!(
            numeric_bytes(&i64::MIN.to_string()),
            numeric_header(5, 4, 0x4000, 0, &[922, 3372, 368, 5477, 5808])
        );

        let mut out = BytesMut::new();
        assert!(write_numeric("1e5", &mut out).is_err());
        assert!(write_numeric("-", &mut out).is_err());
    }

    #[test]
    fn strings_bind_to_temporal_types() {
        let mut out = BytesMut::new();
        WireValue::Str("2013-01-01".to_string())
            .to_sql(&Type::DATE, &mut out)
            .unwrap();
        let mut expected = BytesMut::new();
        NaiveDate::from_ymd_opt(2013, 1, 1)
            .unwrap()
            .to_sql(&Type::DATE, &mut expected)
            .unwrap();
        assert_eq!(out, expected);

        let midnight = NaiveDate::from_ymd_opt(2013, 1, 1)
            .unwrap()
            .and_time(NaiveTime::MIN);
        assert_eq!(parse_timestamp("2013-01-01").unwrap(), midnight);
        assert_eq!(parse_timestamp("2013-01-01 00:00:00").unwrap(), midnight);
        assert_eq!(
            parse_timestamptz("2013-01-01T02:00:00+02:00").unwrap(),
            midnight.and_utc()
        );
        assert_eq!(parse_timestamptz("2013-01-01").unwrap(), midnight.and_utc());

        let mut out = BytesMut::new();
        WireValue::Str("2013-01-01 08:30:00".to_string())
            .to_sql(&Type::TIMESTAMP, &mut out)
            .unwrap();
        assert!(
            WireValue::Str("yesterday".to_string())
                .to_sql(&Type::TIMESTAMPTZ, &mut BytesMut::new())
                .is_err()
        );
    }

    #[test]
    fn null_is_null() {
        let mut out = BytesMut::new();
        assert!(matches!(
            WireValue::Null.to_sql(&Type::INT8, &mut out).unwrap(),
            IsNull::Yes
        ));
    }

    #[test]
    fn named_slots_are_rejected() {
        let params = vec![BoundParam::new(
            BindSlot::Named(":a".to_string()),
            WireValue::Int(1),
        )];
        assert!(positional_params(&params).is_err());
    }

    #[test]
    fn params_are_ordered_by_position() {
        let params = vec![
            BoundParam::new(BindSlot::Position(2), WireValue::Int(2)),
            BoundParam::new(BindSlot::Position(1), WireValue::Int(1)),
        ];
        assert_eq!(positional_params(&params).unwrap().len(), 2);
    }
}
