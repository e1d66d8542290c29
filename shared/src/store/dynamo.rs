use super::attributes::{
    decode_cursor, encode_cursor, item_to_record, record_to_item, GSI1, GSI1PK, PK, SK,
};
use super::{Page, Record, Repository};
use crate::error::StoreError;
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use std::marker::PhantomData;

/// Single-table DynamoDB repository for one entity type.
pub struct DynamoRepository<T> {
    client: DynamoClient,
    table_name: String,
    _entity: PhantomData<fn() -> T>,
}

impl<T> DynamoRepository<T> {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            _entity: PhantomData,
        }
    }
}

fn backend<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl<T: Record> Repository<T> for DynamoRepository<T> {
    async fn get(&self, pk: &str, sk: &str) -> Result<Option<T>, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(PK, AttributeValue::S(pk.to_string()))
            .key(SK, AttributeValue::S(sk.to_string()))
            .send()
            .await
            .map_err(|e| backend(e.into_service_error()))?;

        result.item().map(item_to_record::<T>).transpose()
    }

    async fn list(&self, cursor: Option<String>, limit: usize) -> Result<Page<T>, StoreError> {
        let mut request = self
            .client
            .query()
            .table_name(&self.table_name)
            .index_name(GSI1)
            .key_condition_expression("#gsi1pk = :entity")
            .expression_attribute_names("#gsi1pk", GSI1PK)
            .expression_attribute_values(":entity", AttributeValue::S(T::ENTITY.to_string()))
            .limit(limit.clamp(1, 1000) as i32);
        if let Some(cursor) = cursor.as_deref() {
            request = request.set_exclusive_start_key(Some(decode_cursor(cursor)?));
        }

        let result = request
            .send()
            .await
            .map_err(|e| backend(e.into_service_error()))?;

        let items = result
            .items()
            .iter()
            .map(item_to_record::<T>)
            .collect::<Result<Vec<T>, _>>()?;
        let next_cursor = result.last_evaluated_key().map(encode_cursor).transpose()?;

        Ok(Page { items, next_cursor })
    }

    async fn list_partition(&self, pk: &str) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        let mut start_key = None;
        loop {
            let result = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("PK = :pk")
                .expression_attribute_values(":pk", AttributeValue::S(pk.to_string()))
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|e| backend(e.into_service_error()))?;

            for item in result.items() {
                out.push(item_to_record(item)?);
            }
            match result.last_evaluated_key() {
                Some(key) => start_key = Some(key.clone()),
                None => break,
            }
        }
        Ok(out)
    }

    async fn create(&self, record: &T) -> Result<(), StoreError> {
        let key = format!("{}/{}", record.partition_key(), record.sort_key());
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(record_to_item(record)?))
            .condition_expression("attribute_not_exists(PK)")
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_conditional_check_failed_exception() {
                    StoreError::AlreadyExists(key)
                } else {
                    backend(service_error)
                }
            })?;
        Ok(())
    }

    async fn update(&self, record: &T) -> Result<(), StoreError> {
        let key = format!("{}/{}", record.partition_key(), record.sort_key());
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(record_to_item(record)?))
            .condition_expression("attribute_exists(PK)")
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_conditional_check_failed_exception() {
                    StoreError::NotFound(key)
                } else {
                    backend(service_error)
                }
            })?;
        Ok(())
    }

    async fn put(&self, record: &T) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(record_to_item(record)?))
            .send()
            .await
            .map_err(|e| backend(e.into_service_error()))?;
        Ok(())
    }

    async fn delete(&self, pk: &str, sk: &str) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key(PK, AttributeValue::S(pk.to_string()))
            .key(SK, AttributeValue::S(sk.to_string()))
            .send()
            .await
            .map_err(|e| backend(e.into_service_error()))?;
        Ok(())
    }
}
