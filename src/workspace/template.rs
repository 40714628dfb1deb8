//! Built-in starting tree: a minimal Next.js app directory with Tailwind.

use crate::sandbox::{FileNode, FileTree};

const PACKAGE_JSON: &str = r#"{
  "name": "zerobuild-preview-starter",
  "version": "0.1.0",
  "scripts": {
    "dev": "next dev",
    "build": "next build",
    "start": "next start"
  },
  "dependencies": {
    "next": "latest",
    "react": "latest",
    "react-dom": "latest"
  },
  "devDependencies": {
    "tailwindcss": "latest",
    "postcss": "latest",
    "autoprefixer": "latest"
  }
}
"#;

const NEXT_CONFIG: &str = r#"/** @type {import('next').NextConfig} */
module.exports = {
  reactStrictMode: true,
  experimental: {
    appDir: true
  }
};
"#;

const POSTCSS_CONFIG: &str = r#"module.exports = {
  plugins: {
    tailwindcss: {},
    autoprefixer: {},
  },
};
"#;

const TAILWIND_CONFIG: &str = r#"/** @type {import('tailwindcss').Config} */
module.exports = {
  content: [
    "./app/**/*.{js,ts,jsx,tsx,mdx}",
    "./components/**/*.{js,ts,jsx,tsx,mdx}",
  ],
  theme: {
    extend: {},
  },
  plugins: [],
};
"#;

const LAYOUT_TSX: &str = r#"import "./globals.css";
export const metadata = {
  title: "zerobuild preview"
};
export default function RootLayout({ children }) {
  return (
    <html>
      <body>{children}</body>
    </html>
  );
}
"#;

const PAGE_TSX: &str = r#"export default function Page() {
  return (
    <div style={{textAlign: 'center', marginTop: '3rem'}}>
      <h1>Hello from the starter app/page.tsx!</h1>
      <p>If you see this, Next.js + Tailwind is running in the sandbox.</p>
    </div>
  );
}
"#;

const GLOBALS_CSS: &str = "@tailwind base;\n@tailwind components;\n@tailwind utilities;\n";

pub fn default_file_tree() -> FileTree {
    let mut tree = FileTree::new();
    tree.insert("package.json".into(), FileNode::file(PACKAGE_JSON));
    tree.insert("next.config.js".into(), FileNode::file(NEXT_CONFIG));
    tree.insert("postcss.config.js".into(), FileNode::file(POSTCSS_CONFIG));
    tree.insert("tailwind.config.js".into(), FileNode::file(TAILWIND_CONFIG));
    tree.insert(
        "app".into(),
        FileNode::directory([
            ("layout.tsx", FileNode::file(LAYOUT_TSX)),
            ("page.tsx", FileNode::file(PAGE_TSX)),
            ("globals.css", FileNode::file(GLOBALS_CSS)),
        ]),
    );
    tree
}
