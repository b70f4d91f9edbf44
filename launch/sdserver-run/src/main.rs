// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use sdserver_run::{command, declaration_path, run, schemas};

fn main() -> anyhow::Result<()> {
    sdserver::logging::init();

    // the declaration adds a subcommand, so it must be known before parsing
    let declaration = declaration_path(std::env::args().skip(1));
    let schemas = schemas(declaration.as_deref())?;
    let matches = command(&schemas).get_matches();

    let out = run(&matches, &schemas)?;
    println!("{out}");
    Ok(())
}
