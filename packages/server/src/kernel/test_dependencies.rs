// TestDependencies - mock implementations for testing
//
// Provides an in-memory identity directory that stands in for the remote
// management API.

use async_trait::async_trait;
use auth0_client::{Connection, CreateUserRequest, ManagementError, Role, User, UserPage};
use jsonwebtoken::{DecodingKey, EncodingKey};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{BaseIdentityManagement, BaseSigningKeys};

// =============================================================================
// Mock Identity Management
// =============================================================================

pub struct MockIdentityManagement {
    users: Arc<Mutex<Vec<User>>>,
    user_roles: Arc<Mutex<HashMap<String, Vec<Role>>>>,
    roles: Vec<Role>,
    failing_role_lookups: Arc<Mutex<HashSet<String>>>,
    create_calls: Arc<Mutex<Vec<CreateUserRequest>>>,
    role_lookups: Arc<Mutex<Vec<String>>>,
    role_delay: Option<Duration>,
    roles_in_flight: Arc<AtomicUsize>,
    peak_roles_in_flight: Arc<AtomicUsize>,
}

impl MockIdentityManagement {
    /// Directory with the three standard roles defined and no users.
    pub fn new() -> Self {
        let roles = ["user", "admin", "super"]
            .iter()
            .map(|name| Role {
                id: format!("rol_{}", name),
                name: name.to_string(),
                description: None,
            })
            .collect();

        Self {
            users: Arc::new(Mutex::new(Vec::new())),
            user_roles: Arc::new(Mutex::new(HashMap::new())),
            roles,
            failing_role_lookups: Arc::new(Mutex::new(HashSet::new())),
            create_calls: Arc::new(Mutex::new(Vec::new())),
            role_lookups: Arc::new(Mutex::new(Vec::new())),
            role_delay: None,
            roles_in_flight: Arc::new(AtomicUsize::new(0)),
            peak_roles_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Drop every role definition, as on a directory nobody provisioned.
    pub fn without_roles(mut self) -> Self {
        self.roles.clear();
        self
    }

    pub fn with_user(self, user_id: &str, email: &str, role_names: &[&str]) -> Self {
        self.users.lock().unwrap().push(User {
            user_id: user_id.to_string(),
            email: email.to_string(),
            name: email.to_string(),
            created_at: None,
        });
        let roles = self
            .roles
            .iter()
            .filter(|r| role_names.contains(&r.name.as_str()))
            .cloned()
            .collect();
        self.user_roles
            .lock()
            .unwrap()
            .insert(user_id.to_string(), roles);
        self
    }

    /// Make role lookups for this user fail with a 500.
    pub fn fail_roles_for(self, user_id: &str) -> Self {
        self.failing_role_lookups
            .lock()
            .unwrap()
            .insert(user_id.to_string());
        self
    }

    /// Hold every role lookup open for `delay` so overlapping calls show up
    /// in [`Self::peak_role_lookups`].
    pub fn with_role_delay(mut self, delay: Duration) -> Self {
        self.role_delay = Some(delay);
        self
    }

    /// Most role lookups that were in flight at the same time.
    pub fn peak_role_lookups(&self) -> usize {
        self.peak_roles_in_flight.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> Vec<CreateUserRequest> {
        self.create_calls.lock().unwrap().clone()
    }

    pub fn role_lookups(&self) -> Vec<String> {
        self.role_lookups.lock().unwrap().clone()
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }
}

fn not_found(what: &str) -> ManagementError {
    ManagementError::Api {
        status: 404,
        message: format!("{} not found", what),
    }
}

#[async_trait]
impl BaseIdentityManagement for MockIdentityManagement {
    async fn list_users(&self, page: u32, per_page: u32) -> Result<UserPage, ManagementError> {
        let users = self.users.lock().unwrap();
        let start = (page * per_page) as usize;
        let page_users: Vec<User> = users
            .iter()
            .skip(start)
            .take(per_page as usize)
            .cloned()
            .collect();

        Ok(UserPage {
            users: page_users,
            start: start as i64,
            limit: per_page as i64,
            total: users.len() as i64,
        })
    }

    async fn users_by_email(&self, email: &str) -> Result<Vec<User>, ManagementError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
            .collect())
    }

    async fn get_user(&self, user_id: &str) -> Result<User, ManagementError> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.user_id == user_id)
            .cloned()
            .ok_or_else(|| not_found(user_id))
    }

    async fn user_roles(&self, user_id: &str) -> Result<Vec<Role>, ManagementError> {
        let in_flight = self.roles_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_roles_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        if let Some(delay) = self.role_delay {
            tokio::time::sleep(delay).await;
        }
        self.roles_in_flight.fetch_sub(1, Ordering::SeqCst);

        self.role_lookups.lock().unwrap().push(user_id.to_string());
        if self.failing_role_lookups.lock().unwrap().contains(user_id) {
            return Err(ManagementError::Api {
                status: 500,
                message: "role service unavailable".to_string(),
            });
        }
        Ok(self
            .user_roles
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_user(&self, request: &CreateUserRequest) -> Result<User, ManagementError> {
        self.create_calls.lock().unwrap().push(request.clone());

        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email.eq_ignore_ascii_case(&request.email)) {
            return Err(ManagementError::Api {
                status: 409,
                message: "The user already exists.".to_string(),
            });
        }

        let user = User {
            user_id: format!("auth0|{}", users.len() + 1),
            email: request.email.clone(),
            name: request.name.clone(),
            created_at: Some(chrono::Utc::now()),
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn list_roles(&self) -> Result<Vec<Role>, ManagementError> {
        Ok(self.roles.clone())
    }

    async fn assign_roles(
        &self,
        user_id: &str,
        role_ids: &[String],
    ) -> Result<(), ManagementError> {
        let mut assigned = self.user_roles.lock().unwrap();
        let current = assigned.entry(user_id.to_string()).or_default();
        for id in role_ids {
            if current.iter().any(|r| &r.id == id) {
                continue;
            }
            let role = self
                .roles
                .iter()
                .find(|r| &r.id == id)
                .ok_or_else(|| not_found(id))?;
            current.push(role.clone());
        }
        Ok(())
    }

    async fn get_connection(&self, connection_id: &str) -> Result<Connection, ManagementError> {
        Ok(Connection {
            id: connection_id.to_string(),
            name: "Username-Password-Authentication".to_string(),
            strategy: Some("auth0".to_string()),
        })
    }
}

// =============================================================================
// Mock Signing Keys
// =============================================================================

const TEST_RSA_PRIVATE: &str = include_str!("../../tests/fixtures/jwt_rsa_private.pem");
const TEST_RSA_PUBLIC: &str = include_str!("../../tests/fixtures/jwt_rsa_public.pem");

/// Key id under which [`MockSigningKeys::rsa`] publishes the test key.
pub const TEST_KID: &str = "test-key-1";

/// Signing key matching the public key served by [`MockSigningKeys::rsa`].
pub fn test_encoding_key() -> EncodingKey {
    EncodingKey::from_rsa_pem(TEST_RSA_PRIVATE.as_bytes()).unwrap()
}

pub struct MockSigningKeys {
    keys: HashMap<String, DecodingKey>,
    lookups: Arc<Mutex<Vec<String>>>,
}

impl MockSigningKeys {
    pub fn empty() -> Self {
        Self {
            keys: HashMap::new(),
            lookups: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Serves the test RSA public key under [`TEST_KID`].
    pub fn rsa() -> Self {
        let mut keys = HashMap::new();
        keys.insert(
            TEST_KID.to_string(),
            DecodingKey::from_rsa_pem(TEST_RSA_PUBLIC.as_bytes()).unwrap(),
        );
        Self {
            keys,
            lookups: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseSigningKeys for MockSigningKeys {
    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, ManagementError> {
        self.lookups.lock().unwrap().push(kid.to_string());
        self.keys
            .get(kid)
            .cloned()
            .ok_or_else(|| ManagementError::KeyNotFound(kid.to_string()))
    }
}
