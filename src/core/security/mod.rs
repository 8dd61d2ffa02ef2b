// Copyright (c) 2026 Phinet Contributors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Secret-key storage boundary: the "external key store" the data model
//! refers to. `core::crypto` is pure; everything that touches a secret key
//! at rest lives behind the [`SecretStore`] trait here.

/// `SecretStore` trait plus in-memory and file-backed implementations.
pub mod keystore;

pub use keystore::{FileSecretStore, InMemorySecretStore, SecretStore, SecretStoreError};
