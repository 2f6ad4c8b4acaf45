// Copyright 2022 Adobe. All rights reserved.
// This file is licensed to you under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License. You may obtain a copy
// of the License at http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under
// the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR REPRESENTATIONS
// OF ANY KIND, either express or implied. See the License for the specific language
// governing permissions and limitations under the License.

use blobstore::{CallContext, StorageConfig, StorageProviderFactory, UploadOptions, UploadSource};
use futures::TryStreamExt;

// Expects a Minio server on localhost:9000 with a "demo" bucket:
//   docker run -p 9000:9000 minio/minio server /data
#[tokio::main]
async fn main() {
    let storage_config = StorageConfig::minio_local("demo");
    let provider = StorageProviderFactory::from_config(storage_config)
        .await
        .unwrap();
    let ctx = CallContext::default();
    provider.validate_connection(&ctx).await.unwrap();

    let receipt = provider
        .upload_opts(
            "greetings/hello.txt",
            UploadSource::from("hello from blobstore".to_string()),
            UploadOptions::new("text/plain").if_absent(),
            &ctx,
        )
        .await;
    println!("Upload: {:?}", receipt);

    let body = provider
        .download("greetings/hello.txt")
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    println!("Downloaded: {}", String::from_utf8_lossy(&body));

    let listed: Vec<_> = provider.list("greetings/").try_collect().await.unwrap();
    for meta in listed {
        println!("{} {} {}", meta.key, meta.size, meta.content_type);
    }

    provider.delete("greetings/hello.txt").await.unwrap();
}
