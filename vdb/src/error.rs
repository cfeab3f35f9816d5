// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("database is shutting down")]
    Shutdown,

    #[error("no data has been installed yet")]
    NoData,

    #[error("no composable diff from serial {from} to {current}")]
    DiffUnavailable { from: u32, current: u32 },
}
