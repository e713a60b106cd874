//! `PostgreSQL` store implementation for task records.

use super::{
    models::{NewTaskRow, TaskLifecycleChangeset, TaskRow},
    schema::tasks,
};
use crate::pg::{PgPool, get_conn_with, run_blocking_with};
use crate::task::{
    domain::{
        OwnerId, PersistedTaskData, ResultUri, SourceUri, Task, TaskId, TaskStatus,
    },
    ports::{TaskStore, TaskStoreError, TaskStoreResult, TaskStream, TransitionOutcome},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use futures::{StreamExt, TryStreamExt, stream};

/// Rows fetched per round trip when streaming owner queries.
const OWNER_PAGE_SIZE: usize = 100;

/// Keyset cursor for owner queries: `(created_at, id)` of the last row.
type OwnerCursor = Option<(DateTime<Utc>, uuid::Uuid)>;

/// `PostgreSQL`-backed task store.
#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    /// Creates a new store from a `PostgreSQL` connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run_blocking<F, T>(&self, f: F) -> TaskStoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> TaskStoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        run_blocking_with(
            move || {
                let mut connection = get_conn_with(&pool, TaskStoreError::unavailable)?;
                f(&mut connection)
            },
            TaskStoreError::unavailable,
        )
        .await
    }

    async fn fetch_owner_page(
        &self,
        owner_id: String,
        after: OwnerCursor,
    ) -> TaskStoreResult<Vec<Task>> {
        self.run_blocking(move |connection| {
            let mut query = tasks::table
                .filter(tasks::owner_id.eq(owner_id))
                .order((tasks::created_at.asc(), tasks::id.asc()))
                .limit(i64::try_from(OWNER_PAGE_SIZE).map_err(TaskStoreError::unavailable)?)
                .select(TaskRow::as_select())
                .into_boxed();
            if let Some((created_at, id)) = after {
                query = query.filter(
                    tasks::created_at
                        .gt(created_at)
                        .or(tasks::created_at.eq(created_at).and(tasks::id.gt(id))),
                );
            }
            let rows = query
                .load::<TaskRow>(connection)
                .map_err(TaskStoreError::unavailable)?;
            rows.into_iter().map(row_to_task).collect()
        })
        .await
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn insert(&self, task: &Task) -> TaskStoreResult<()> {
        let task_id = task.id();
        let new_row = to_new_row(task);

        self.run_blocking(move |connection| {
            diesel::insert_into(tasks::table)
                .values(&new_row)
                .execute(connection)
                .map_err(|err| match err {
                    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                        TaskStoreError::Conflict(task_id)
                    }
                    _ => TaskStoreError::unavailable(err),
                })?;
            Ok(())
        })
        .await
    }

    async fn update(&self, task: &Task) -> TaskStoreResult<()> {
        let task_id = task.id();
        let changes = to_changeset(task);

        self.run_blocking(move |connection| {
            let affected = diesel::update(tasks::table.filter(tasks::id.eq(task_id.into_inner())))
                .set(&changes)
                .execute(connection)
                .map_err(TaskStoreError::unavailable)?;
            if affected == 0 {
                return Err(TaskStoreError::NotFound(task_id));
            }
            Ok(())
        })
        .await
    }

    async fn transition(
        &self,
        task: &Task,
        expected: TaskStatus,
    ) -> TaskStoreResult<TransitionOutcome> {
        let task_id = task.id();
        let changes = to_changeset(task);

        self.run_blocking(move |connection| {
            // Single conditional statement; the row lock taken by UPDATE makes
            // the status check and the write atomic.
            let applied = diesel::update(
                tasks::table
                    .filter(tasks::id.eq(task_id.into_inner()))
                    .filter(tasks::status.eq(expected.as_str())),
            )
            .set(&changes)
            .returning(TaskRow::as_returning())
            .get_result::<TaskRow>(connection)
            .optional()
            .map_err(TaskStoreError::unavailable)?;

            if let Some(row) = applied {
                return row_to_task(row).map(TransitionOutcome::Applied);
            }

            let current = find_row(connection, task_id)?.ok_or(TaskStoreError::NotFound(task_id))?;
            row_to_task(current).map(TransitionOutcome::Stale)
        })
        .await
    }

    async fn find_by_id(&self, id: TaskId) -> TaskStoreResult<Option<Task>> {
        self.run_blocking(move |connection| find_row(connection, id)?.map(row_to_task).transpose())
            .await
    }

    fn query_by_owner(&self, owner_id: &OwnerId) -> TaskStream {
        let store = self.clone();
        let owner = owner_id.as_str().to_owned();
        let pages = stream::try_unfold(Some(None), move |cursor: Option<OwnerCursor>| {
            next_owner_page(store.clone(), owner.clone(), cursor)
        });
        pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<Task, TaskStoreError>)))
            .try_flatten()
            .boxed()
    }

    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> TaskStoreResult<Vec<Task>> {
        let row_limit = i64::try_from(limit).map_err(TaskStoreError::unavailable)?;
        self.run_blocking(move |connection| {
            let rows = tasks::table
                .filter(tasks::status.eq(TaskStatus::Pending.as_str()))
                .filter(tasks::updated_at.lt(cutoff))
                .order(tasks::updated_at.asc())
                .limit(row_limit)
                .select(TaskRow::as_select())
                .load::<TaskRow>(connection)
                .map_err(TaskStoreError::unavailable)?;
            rows.into_iter().map(row_to_task).collect()
        })
        .await
    }

    async fn ping(&self) -> TaskStoreResult<()> {
        self.run_blocking(|connection| {
            diesel::sql_query("SELECT 1")
                .execute(connection)
                .map(|_| ())
                .map_err(TaskStoreError::unavailable)
        })
        .await
    }
}

/// Fetches the page after `cursor`; `None` as cursor means the previous page
/// was short and the pass is finished.
async fn next_owner_page(
    store: PostgresTaskStore,
    owner: String,
    cursor: Option<OwnerCursor>,
) -> TaskStoreResult<Option<(Vec<Task>, Option<OwnerCursor>)>> {
    let Some(after) = cursor else {
        return Ok(None);
    };
    let page = store.fetch_owner_page(owner, after).await?;
    if page.is_empty() {
        return Ok(None);
    }
    let next = if page.len() < OWNER_PAGE_SIZE {
        None
    } else {
        page.last()
            .map(|task| Some((task.created_at(), task.id().into_inner())))
    };
    Ok(Some((page, next)))
}

fn find_row(connection: &mut PgConnection, id: TaskId) -> TaskStoreResult<Option<TaskRow>> {
    tasks::table
        .filter(tasks::id.eq(id.into_inner()))
        .select(TaskRow::as_select())
        .first::<TaskRow>(connection)
        .optional()
        .map_err(TaskStoreError::unavailable)
}

fn to_new_row(task: &Task) -> NewTaskRow {
    NewTaskRow {
        id: task.id().into_inner(),
        owner_id: task.owner_id().as_str().to_owned(),
        source_uri: task.source_uri().as_str().to_owned(),
        result_uri: task.result_uri().map(|uri| uri.as_str().to_owned()),
        status: task.status().as_str().to_owned(),
        created_at: task.created_at(),
        updated_at: task.updated_at(),
    }
}

fn to_changeset(task: &Task) -> TaskLifecycleChangeset {
    TaskLifecycleChangeset {
        result_uri: task.result_uri().map(|uri| uri.as_str().to_owned()),
        status: task.status().as_str().to_owned(),
        updated_at: task.updated_at(),
    }
}

fn row_to_task(row: TaskRow) -> TaskStoreResult<Task> {
    let status = TaskStatus::try_from(row.status.as_str()).map_err(TaskStoreError::unavailable)?;
    let owner_id = OwnerId::new(row.owner_id).map_err(TaskStoreError::unavailable)?;
    let source_uri = SourceUri::new(row.source_uri).map_err(TaskStoreError::unavailable)?;
    let result_uri = row
        .result_uri
        .map(ResultUri::new)
        .transpose()
        .map_err(TaskStoreError::unavailable)?;

    Ok(Task::from_persisted(PersistedTaskData {
        id: TaskId::from_uuid(row.id),
        owner_id,
        source_uri,
        result_uri,
        status,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }))
}
