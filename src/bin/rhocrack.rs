// Copyright 2024 the rhocrack authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Thin command line front end over the synchronous service.

use rhocrack::exec_tools::Tools;
use rhocrack::service::{self, FactorRequest};

fn main() {
    let arg = arguments::parse(std::env::args()).unwrap();
    if arg.orphans.len() != 1 {
        println!(
            "Usage: rhocrack [--budget-ms N] [--budget ITERS] [--strategy cascade|rho] [--threads N] NUMBER"
        );
        return;
    }
    let threads = arg.get::<usize>("threads");
    let tpool: Option<rayon::ThreadPool> = threads.map(|t| {
        eprintln!("Using a pool of {} threads", t);
        rayon::ThreadPoolBuilder::new()
            .num_threads(t)
            .build()
            .expect("cannot create thread pool")
    });
    let req = FactorRequest {
        n: arg.orphans[0].clone(),
        budget_ms: arg.get::<u64>("budget-ms"),
        budget_iters: arg.get::<u64>("budget"),
        strategy: arg.get::<String>("strategy"),
    };
    let tools = Tools::detect();
    let resp = service::factor_sync(&req, &tools, tpool.as_ref());
    println!("{}", serde_json::to_string_pretty(&resp).unwrap());
}
