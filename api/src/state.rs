// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use pledger_common::store::Store;

/// Shared handler state (§4.12), the same `State<Arc<_>>` shape as the
/// teacher's `SubgraphServiceState` — one field per collaborator a handler
/// might need, cloned cheaply behind the `axum::extract::State` extractor.
pub struct ApiState {
    pub store: Store,
    pub api_key: String,
}
