//! Commit sequencing. The synchronous and asynchronous paths issue the same statements in
//! the same order, they only differ in where they wait on I/O.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    database::{
        buffer::TabularBuffer,
        client::{
            AsyncBulkTransport, AsyncDatabase, BulkTransport, BulkWriteOptions, Database,
            NativeError, SqlParameter,
        },
        schema::SchemaCache,
    },
    error::BulkError,
    operations::{
        bulk::{BulkPlan, StagingScript},
        identity::{reconcile, reconcile_parameter},
        query::{DeletePlan, QueryPlan},
    },
    row::value::{SqlValue, ValueKind},
    sql::{
        identifier::{unquote_identifier, TargetTable},
        statement::{build_disable_indexes, build_rebuild_indexes, STAGING_TABLE},
    },
    types::code::Code,
};

type Output = Vec<Vec<SqlValue>>;

fn index_parameters(table: &TargetTable) -> Vec<SqlParameter> {
    vec![
        SqlParameter::input(
            "@TableName",
            SqlValue::String(unquote_identifier(table.table())),
            ValueKind::String,
        ),
        SqlParameter::input(
            "@SchemaName",
            SqlValue::String(unquote_identifier(table.schema())),
            ValueKind::String,
        ),
    ]
}

/// Keeps the body's error when both the body and the rebuild fail.
fn after_rebuild<T, E: NativeError>(
    body: Result<T, BulkError<E>>,
    rebuild: Result<u64, BulkError<E>>,
    target: &str,
) -> Result<T, BulkError<E>> {
    match (body, rebuild) {
        (Ok(value), Ok(_)) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(_)) => Err(err),
        (Err(err), Err(rebuild_err)) => {
            warn!("Could not rebuild indexes on {} after a failed load: {}", target, rebuild_err);
            Err(err)
        }
    }
}

/// Drop errors only surface when the rest of the flow succeeded.
fn after_drop<T, E: NativeError>(
    body: Result<T, BulkError<E>>,
    cleanup: Result<(), BulkError<E>>,
) -> Result<T, BulkError<E>> {
    match (body, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), cleanup) => {
            if let Err(drop_err) = cleanup {
                debug!("Staging cleanup failed after an earlier error: {}", drop_err);
            }
            Err(err)
        }
    }
}

fn execute<C: Database>(
    connection: &mut C,
    sql: &Code,
    parameters: &mut [SqlParameter],
    timeout: Duration,
) -> Result<u64, BulkError<C::Error>> {
    debug!("Executing: {}", sql);
    connection.execute(sql.as_str(), parameters, timeout).map_err(BulkError::from_engine)
}

fn open<C: Database>(connection: &mut C) -> Result<(), BulkError<C::Error>> {
    if !connection.is_open() {
        debug!("Opening connection to {}", connection.database_name());
        connection.open().map_err(BulkError::from_engine)?;
    }
    Ok(())
}

fn write<C: BulkTransport>(
    connection: &mut C,
    destination: &str,
    buffer: &TabularBuffer,
    options: &BulkWriteOptions,
) -> Result<u64, BulkError<C::Error>> {
    debug!("Loading {} rows into {}", buffer.len(), destination);
    connection.write(destination, buffer, options).map_err(BulkError::from_engine)
}

fn drop_staging<C: Database>(
    connection: &mut C,
    script: &StagingScript,
    timeout: Duration,
) -> Result<(), BulkError<C::Error>> {
    let mut result = Ok(());
    for sql in &script.drop {
        if let Err(err) = execute(connection, sql, &mut [], timeout) {
            result = result.and(Err(err));
        }
    }
    result
}

fn run_staged<C: BulkTransport>(
    connection: &mut C,
    script: &StagingScript,
    buffer: &TabularBuffer,
    options: &BulkWriteOptions,
    timeout: Duration,
) -> Result<(u64, Option<Output>), BulkError<C::Error>> {
    execute(connection, &script.create_staging, &mut [], timeout)?;
    if let Some(create_output) = &script.create_output {
        execute(connection, create_output, &mut [], timeout)?;
    }

    write(connection, STAGING_TABLE, buffer, options)?;

    let mut parameters = script.parameters.clone();
    let affected = execute(connection, &script.merge, &mut parameters, timeout)?;

    let output = match &script.read_output {
        Some(sql) => {
            debug!("Executing: {}", sql);
            Some(connection.query(sql.as_str(), &[], timeout).map_err(BulkError::from_engine)?)
        }
        None => None,
    };

    Ok((affected, output))
}

fn run_body<T, C: BulkTransport>(
    plan: &BulkPlan<T>,
    connection: &mut C,
    target: &str,
    script: Option<&StagingScript>,
    buffer: &TabularBuffer,
    options: &BulkWriteOptions,
) -> Result<(u64, Option<Output>), BulkError<C::Error>> {
    if plan.disable_indexes {
        info!("Disabling non-clustered indexes on {}", target);
        execute(connection, &build_disable_indexes(), &mut index_parameters(&plan.table), plan.timeout)?;
    }

    match script {
        Some(script) => {
            let result = run_staged(connection, script, buffer, options, plan.timeout);
            let cleanup = drop_staging(connection, script, plan.timeout);
            after_drop(result, cleanup)
        }
        None => Ok((write(connection, target, buffer, options)?, None)),
    }
}

pub(crate) fn commit<T, C: BulkTransport>(
    cache: &mut SchemaCache,
    plan: &BulkPlan<T>,
    connection: &mut C,
    rows: &mut [T],
) -> Result<u64, BulkError<C::Error>> {
    if rows.is_empty() {
        return Ok(0);
    }

    open(connection)?;
    let target = plan.table.qualified_name(connection.database_name());
    let staged = plan.is_staged();

    let script = if staged {
        let schema = cache.fetch(connection, &plan.table)?;
        Some(plan.staging_script(&schema, &target)?)
    } else {
        None
    };

    let buffer = plan.buffer(rows, staged);
    let options = plan.write_options(staged);

    let mut result = run_body(plan, connection, &target, script.as_ref(), &buffer, &options);
    if plan.disable_indexes {
        info!("Rebuilding indexes on {}", target);
        let rebuild = execute(connection, &build_rebuild_indexes(&target), &mut [], plan.timeout);
        result = after_rebuild(result, rebuild, &target);
    }
    let (affected, output) = result?;

    if let (Some(identity), Some(output)) = (plan.output_identity(), output) {
        reconcile::<_, C::Error>(&plan.shape, identity, rows, output)?;
    }

    info!("{} affected {} rows on {}", plan.kind.operation_name(), affected, target);
    Ok(affected)
}

pub(crate) fn commit_query<T, C: Database>(
    plan: &QueryPlan<T>,
    connection: &mut C,
    row: &mut T,
) -> Result<u64, BulkError<C::Error>> {
    open(connection)?;
    let target = plan.table.qualified_name(connection.database_name());

    let (sql, mut parameters) = plan.render(&target, row);
    let affected = execute(connection, &sql, &mut parameters, plan.timeout)?;

    if let Some((identity, name)) = plan.output_identity() {
        reconcile_parameter::<_, C::Error>(plan.shape(), identity, row, &parameters, &name)?;
    }

    Ok(affected)
}

/// With a batch quantity the bounded delete repeats until a round deletes nothing.
pub(crate) fn commit_delete<C: Database>(
    plan: &DeletePlan,
    connection: &mut C,
) -> Result<u64, BulkError<C::Error>> {
    open(connection)?;
    let target = plan.table.qualified_name(connection.database_name());
    let (sql, parameters) = plan.render(&target);

    let mut total = 0;
    loop {
        let affected = execute(connection, &sql, &mut parameters.clone(), plan.timeout)?;
        total += affected;
        if plan.batch_quantity.is_none() || affected == 0 {
            break;
        }
    }

    debug!("Deleted {} rows from {}", total, target);
    Ok(total)
}

async fn execute_async<C: AsyncDatabase>(
    connection: &mut C,
    sql: &Code,
    parameters: &mut [SqlParameter],
    timeout: Duration,
) -> Result<u64, BulkError<C::Error>> {
    debug!("Executing: {}", sql);
    connection.execute(sql.as_str(), parameters, timeout).await.map_err(BulkError::from_engine)
}

async fn open_async<C: AsyncDatabase>(connection: &mut C) -> Result<(), BulkError<C::Error>> {
    if !connection.is_open() {
        debug!("Opening connection to {}", connection.database_name());
        connection.open().await.map_err(BulkError::from_engine)?;
    }
    Ok(())
}

async fn write_async<C: AsyncBulkTransport>(
    connection: &mut C,
    destination: &str,
    buffer: &TabularBuffer,
    options: &BulkWriteOptions,
) -> Result<u64, BulkError<C::Error>> {
    debug!("Loading {} rows into {}", buffer.len(), destination);
    connection.write(destination, buffer, options).await.map_err(BulkError::from_engine)
}

async fn drop_staging_async<C: AsyncDatabase>(
    connection: &mut C,
    script: &StagingScript,
    timeout: Duration,
) -> Result<(), BulkError<C::Error>> {
    let mut result = Ok(());
    for sql in &script.drop {
        if let Err(err) = execute_async(connection, sql, &mut [], timeout).await {
            result = result.and(Err(err));
        }
    }
    result
}

async fn run_staged_async<C: AsyncBulkTransport>(
    connection: &mut C,
    script: &StagingScript,
    buffer: &TabularBuffer,
    options: &BulkWriteOptions,
    timeout: Duration,
) -> Result<(u64, Option<Output>), BulkError<C::Error>> {
    execute_async(connection, &script.create_staging, &mut [], timeout).await?;
    if let Some(create_output) = &script.create_output {
        execute_async(connection, create_output, &mut [], timeout).await?;
    }

    write_async(connection, STAGING_TABLE, buffer, options).await?;

    let mut parameters = script.parameters.clone();
    let affected = execute_async(connection, &script.merge, &mut parameters, timeout).await?;

    let output = match &script.read_output {
        Some(sql) => {
            debug!("Executing: {}", sql);
            Some(
                connection
                    .query(sql.as_str(), &[], timeout)
                    .await
                    .map_err(BulkError::from_engine)?,
            )
        }
        None => None,
    };

    Ok((affected, output))
}

async fn run_body_async<T, C: AsyncBulkTransport>(
    plan: &BulkPlan<T>,
    connection: &mut C,
    target: &str,
    script: Option<&StagingScript>,
    buffer: &TabularBuffer,
    options: &BulkWriteOptions,
) -> Result<(u64, Option<Output>), BulkError<C::Error>> {
    if plan.disable_indexes {
        info!("Disabling non-clustered indexes on {}", target);
        let mut parameters = index_parameters(&plan.table);
        execute_async(connection, &build_disable_indexes(), &mut parameters, plan.timeout).await?;
    }

    match script {
        Some(script) => {
            let result = run_staged_async(connection, script, buffer, options, plan.timeout).await;
            let cleanup = drop_staging_async(connection, script, plan.timeout).await;
            after_drop(result, cleanup)
        }
        None => Ok((write_async(connection, target, buffer, options).await?, None)),
    }
}

pub(crate) async fn commit_async<T, C: AsyncBulkTransport>(
    cache: &mut SchemaCache,
    plan: &BulkPlan<T>,
    connection: &mut C,
    rows: &mut [T],
) -> Result<u64, BulkError<C::Error>> {
    if rows.is_empty() {
        return Ok(0);
    }

    open_async(connection).await?;
    let target = plan.table.qualified_name(connection.database_name());
    let staged = plan.is_staged();

    let script = if staged {
        let schema = cache.fetch_async(connection, &plan.table).await?;
        Some(plan.staging_script(&schema, &target)?)
    } else {
        None
    };

    let buffer = plan.buffer(rows, staged);
    let options = plan.write_options(staged);

    let mut result =
        run_body_async(plan, connection, &target, script.as_ref(), &buffer, &options).await;
    if plan.disable_indexes {
        info!("Rebuilding indexes on {}", target);
        let rebuild =
            execute_async(connection, &build_rebuild_indexes(&target), &mut [], plan.timeout).await;
        result = after_rebuild(result, rebuild, &target);
    }
    let (affected, output) = result?;

    if let (Some(identity), Some(output)) = (plan.output_identity(), output) {
        reconcile::<_, C::Error>(&plan.shape, identity, rows, output)?;
    }

    info!("{} affected {} rows on {}", plan.kind.operation_name(), affected, target);
    Ok(affected)
}

pub(crate) async fn commit_query_async<T, C: AsyncDatabase>(
    plan: &QueryPlan<T>,
    connection: &mut C,
    row: &mut T,
) -> Result<u64, BulkError<C::Error>> {
    open_async(connection).await?;
    let target = plan.table.qualified_name(connection.database_name());

    let (sql, mut parameters) = plan.render(&target, row);
    let affected = execute_async(connection, &sql, &mut parameters, plan.timeout).await?;

    if let Some((identity, name)) = plan.output_identity() {
        reconcile_parameter::<_, C::Error>(plan.shape(), identity, row, &parameters, &name)?;
    }

    Ok(affected)
}

pub(crate) async fn commit_delete_async<C: AsyncDatabase>(
    plan: &DeletePlan,
    connection: &mut C,
) -> Result<u64, BulkError<C::Error>> {
    open_async(connection).await?;
    let target = plan.table.qualified_name(connection.database_name());
    let (sql, parameters) = plan.render(&target);

    let mut total = 0;
    loop {
        let mut round = parameters.clone();
        let affected = execute_async(connection, &sql, &mut round, plan.timeout).await?;
        total += affected;
        if plan.batch_quantity.is_none() || affected == 0 {
            break;
        }
    }

    debug!("Deleted {} rows from {}", total, target);
    Ok(total)
}
