use async_trait::async_trait;
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;

/// A user as seen by the managed identity provider.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryUser {
    pub subject: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DirectoryPage {
    pub users: Vec<DirectoryUser>,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn list_users(&self, page_token: Option<String>) -> Result<DirectoryPage, String>;
}

pub struct CognitoDirectory {
    client: CognitoClient,
    user_pool_id: String,
}

impl CognitoDirectory {
    pub fn new(client: CognitoClient, user_pool_id: impl Into<String>) -> Self {
        Self {
            client,
            user_pool_id: user_pool_id.into(),
        }
    }
}

#[async_trait]
impl IdentityDirectory for CognitoDirectory {
    async fn list_users(&self, page_token: Option<String>) -> Result<DirectoryPage, String> {
        let response = self
            .client
            .list_users()
            .user_pool_id(&self.user_pool_id)
            .limit(60)
            .set_pagination_token(page_token)
            .send()
            .await
            .map_err(|e| format!("Cognito list_users failed: {:?}", e))?;

        let users = response
            .users()
            .iter()
            .filter_map(|user| {
                let attribute = |name: &str| {
                    user.attributes()
                        .iter()
                        .find(|a| a.name() == name)
                        .and_then(|a| a.value())
                        .map(|v| v.to_string())
                };
                let subject = attribute("sub").or_else(|| user.username().map(|u| u.to_string()))?;
                Some(DirectoryUser {
                    subject,
                    email: attribute("email"),
                    email_verified: attribute("email_verified").as_deref() == Some("true"),
                    enabled: user.enabled(),
                })
            })
            .collect();

        Ok(DirectoryPage {
            users,
            next_token: response.pagination_token().map(|t| t.to_string()),
        })
    }
}

/// Fixed user list served in pages of `page_size`.
pub struct MemoryDirectory {
    users: Vec<DirectoryUser>,
    page_size: usize,
}

impl MemoryDirectory {
    pub fn new(users: Vec<DirectoryUser>, page_size: usize) -> Self {
        Self {
            users,
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl IdentityDirectory for MemoryDirectory {
    async fn list_users(&self, page_token: Option<String>) -> Result<DirectoryPage, String> {
        let offset = page_token
            .map(|t| t.parse::<usize>().map_err(|_| format!("bad page token {:?}", t)))
            .transpose()?
            .unwrap_or(0);
        let users: Vec<DirectoryUser> = self
            .users
            .iter()
            .skip(offset)
            .take(self.page_size)
            .cloned()
            .collect();
        let next = offset + users.len();
        Ok(DirectoryPage {
            users,
            next_token: (next < self.users.len()).then(|| next.to_string()),
        })
    }
}
