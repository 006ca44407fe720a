use std::collections::{HashMap, HashSet};

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::entities::wbs::{ActiveModel as WbsActiveModel, Column, Entity as Wbs, Model as WbsModel};
use crate::errors::{AppError, ServiceError};

/// Repository for work breakdown structure nodes
#[derive(Debug, Clone, Copy, Default)]
pub struct WbsRepository;

impl WbsRepository {
    pub async fn find_by_id<C: ConnectionTrait>(
        db: &C,
        id: i64,
    ) -> Result<Option<WbsModel>, AppError> {
        Wbs::find_by_id(id)
            .one(db)
            .await
            .map_err(AppError::DatabaseError)
    }

    pub async fn get<C: ConnectionTrait>(db: &C, id: i64) -> Result<WbsModel, AppError> {
        Self::find_by_id(db, id)
            .await?
            .ok_or_else(|| ServiceError::not_found("WBS", id))
    }

    pub async fn find_by_ids<C: ConnectionTrait>(
        db: &C,
        ids: &[i64],
    ) -> Result<Vec<WbsModel>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Wbs::find()
            .filter(Column::Id.is_in(ids.iter().copied()))
            .order_by_asc(Column::Id)
            .all(db)
            .await
            .map_err(AppError::DatabaseError)
    }

    pub async fn find_children<C: ConnectionTrait>(
        db: &C,
        parent_ids: &[i64],
    ) -> Result<Vec<WbsModel>, AppError> {
        if parent_ids.is_empty() {
            return Ok(Vec::new());
        }
        Wbs::find()
            .filter(Column::ParentId.is_in(parent_ids.iter().copied()))
            .order_by_asc(Column::Id)
            .all(db)
            .await
            .map_err(AppError::DatabaseError)
    }

    /// `root_ids` and all of their descendants, one query per level
    pub async fn load_subtrees<C: ConnectionTrait>(
        db: &C,
        root_ids: &[i64],
    ) -> Result<Vec<WbsModel>, AppError> {
        let mut nodes = Self::find_by_ids(db, root_ids).await?;
        let mut seen: HashSet<i64> = nodes.iter().map(|n| n.id).collect();
        let mut frontier: Vec<i64> = seen.iter().copied().collect();

        while !frontier.is_empty() {
            let children = Self::find_children(db, &frontier).await?;
            frontier.clear();
            for child in children {
                if seen.insert(child.id) {
                    frontier.push(child.id);
                    nodes.push(child);
                }
            }
        }
        Ok(nodes)
    }

    /// Walks `parent_id` links from each of `ids` up to its root. Returns
    /// the root id reached from each input, in input order.
    pub async fn root_ids<C: ConnectionTrait>(db: &C, ids: &[i64]) -> Result<Vec<i64>, AppError> {
        let mut roots = Vec::with_capacity(ids.len());
        let mut cache = HashMap::new();

        for &id in ids {
            let mut current = id;
            let mut visited = HashSet::new();
            loop {
                if !visited.insert(current) {
                    return Err(ServiceError::InternalError(format!(
                        "WBS {} is part of a parent cycle",
                        current
                    )));
                }
                let parent = match cache.get(&current) {
                    Some(parent) => *parent,
                    None => {
                        let node = Self::get(db, current).await?;
                        cache.insert(current, node.parent_id);
                        node.parent_id
                    }
                };
                match parent {
                    Some(p) => current = p,
                    None => break,
                }
            }
            roots.push(current);
        }
        Ok(roots)
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        node: WbsActiveModel,
    ) -> Result<WbsModel, AppError> {
        node.insert(db).await.map_err(AppError::DatabaseError)
    }

    pub async fn set_parent<C: ConnectionTrait>(
        db: &C,
        id: i64,
        parent_id: Option<i64>,
    ) -> Result<WbsModel, AppError> {
        let active = WbsActiveModel {
            id: Set(id),
            parent_id: Set(parent_id),
            ..Default::default()
        };
        active.update(db).await.map_err(AppError::DatabaseError)
    }

    pub async fn delete_many<C: ConnectionTrait>(db: &C, ids: &[i64]) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = Wbs::delete_many()
            .filter(Column::Id.is_in(ids.iter().copied()))
            .exec(db)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(result.rows_affected)
    }
}
